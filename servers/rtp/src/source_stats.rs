//! Per-SSRC reception accounting, RFC 3550 appendices A.1/A.3/A.8.

use std::time::{Duration, Instant};

use num::ToPrimitive;
use rtp_formats::rtcp::{report_block::ReportBlock, simple_ntp::SimpleNtp};

const MAX_DROPOUT: u16 = 3000;
const MAX_MISORDER: u16 = 100;
const RTP_SEQ_MOD: u32 = 1 << 16;

#[derive(Debug, Clone)]
pub struct SourceStats {
    ssrc: u32,
    clock_rate: u32,

    base_sequence_number: u16,
    max_sequence_number: u16,
    sequence_number_cycles: u16,
    bad_sequence_number: Option<u32>,
    packets_received: u64,
    expected_prior: u64,
    received_prior: u64,

    /// Scaled interarrival jitter estimate, RFC 3550 A.8.
    jitter: f64,
    last_transit: Option<i64>,

    last_sr_ntp: Option<SimpleNtp>,
    last_sr_instant: Option<Instant>,
}

impl SourceStats {
    pub fn new(ssrc: u32, clock_rate: u32, first_sequence_number: u16) -> Self {
        Self {
            ssrc,
            clock_rate,
            base_sequence_number: first_sequence_number,
            max_sequence_number: first_sequence_number,
            sequence_number_cycles: 0,
            bad_sequence_number: None,
            packets_received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0.0,
            last_transit: None,
            last_sr_instant: None,
            last_sr_ntp: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn extended_highest_sequence(&self) -> u32 {
        (self.sequence_number_cycles as u32) * RTP_SEQ_MOD + self.max_sequence_number as u32
    }

    fn expected(&self) -> u64 {
        (self.extended_highest_sequence() as u64)
            .saturating_sub(self.base_sequence_number as u64)
            + 1
    }

    fn update_sequence_number(&mut self, sequence_number: u16) {
        let delta = sequence_number.wrapping_sub(self.max_sequence_number);
        if delta < MAX_DROPOUT {
            if sequence_number < self.max_sequence_number {
                self.sequence_number_cycles = self.sequence_number_cycles.wrapping_add(1);
            }
            self.max_sequence_number = sequence_number;
            self.bad_sequence_number = None;
        } else if delta <= u16::MAX - MAX_MISORDER {
            // large jump, likely a peer-side sequence reset
            if Some(sequence_number as u32) == self.bad_sequence_number {
                self.base_sequence_number = sequence_number;
                self.max_sequence_number = sequence_number;
                self.sequence_number_cycles = 0;
                self.packets_received = 0;
                self.expected_prior = 0;
                self.received_prior = 0;
                self.bad_sequence_number = None;
            } else {
                self.bad_sequence_number =
                    Some((sequence_number as u32).wrapping_add(1) % RTP_SEQ_MOD);
            }
        } else {
            // duplicate or reordered packet, counted but not advancing
        }
    }

    /// Records an RTP arrival. Returns the count of packets newly detected
    /// as missing in front of this one.
    pub fn on_rtp_packet(
        &mut self,
        sequence_number: u16,
        rtp_timestamp: u32,
        arrival: Instant,
        arrival_reference: Instant,
    ) -> u64 {
        let expected_before = self.expected();
        self.update_sequence_number(sequence_number);
        self.packets_received += 1;

        // RFC 3550 A.8 interarrival jitter
        let arrival_rtp_units = (arrival
            .duration_since(arrival_reference)
            .as_secs_f64()
            * self.clock_rate as f64) as i64;
        let transit = arrival_rtp_units - rtp_timestamp as i64;
        if let Some(last_transit) = self.last_transit {
            let d = (transit - last_transit).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);

        let expected_after = self.expected();
        let gap = expected_after.saturating_sub(expected_before);
        gap.saturating_sub(1)
    }

    pub fn on_sender_report(&mut self, ntp: SimpleNtp, arrival: Instant) {
        self.last_sr_ntp = Some(ntp);
        self.last_sr_instant = Some(arrival);
    }

    fn fraction_lost(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.packets_received.saturating_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.packets_received;

        let lost_interval = expected_interval.saturating_sub(received_interval);
        if expected_interval == 0 || lost_interval == 0 {
            return 0;
        }
        ((lost_interval << 8) / expected_interval).min(255) as u8
    }

    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.packets_received as i64
    }

    /// One RR block for this source; resets the per-interval loss counters.
    pub fn report_block(&mut self, now: Instant) -> ReportBlock {
        let delay_since_last_sr = self
            .last_sr_instant
            .map(|instant| {
                (now.saturating_duration_since(instant).as_nanos() * 65536 / 1_000_000_000)
                    .to_u32()
                    .unwrap_or(u32::MAX)
            })
            .unwrap_or(0);
        ReportBlock::builder()
            .ssrc(self.ssrc)
            .fraction_lost(self.fraction_lost())
            .cumulative_packet_lost(
                self.cumulative_lost().clamp(-(1 << 23), (1 << 23) - 1) as i32
            )
            .highest_sequence_number_received(self.max_sequence_number)
            .highest_sequence_number_cycles(self.sequence_number_cycles)
            .interarrival_jitter(self.jitter.to_u32().unwrap_or(0))
            .last_sr(
                self.last_sr_ntp
                    .map(|ntp| ntp.middle_32_bits())
                    .unwrap_or(0),
            )
            .delay_since_last_sr(delay_since_last_sr)
            .build()
    }

    pub fn since_last_sr(&self, now: Instant) -> Option<Duration> {
        self.last_sr_instant
            .map(|instant| now.saturating_duration_since(instant))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stats() -> (SourceStats, Instant) {
        let reference = Instant::now();
        (SourceStats::new(0x1234, 90000, 100), reference)
    }

    #[test]
    fn sequential_packets_report_no_loss() {
        let (mut stats, reference) = stats();
        for seq in 100_u16..110 {
            let lost = stats.on_rtp_packet(seq, 0, reference, reference);
            assert_eq!(lost, 0);
        }
        let block = stats.report_block(reference);
        assert_eq!(block.fraction_lost, 0);
        assert_eq!(block.cumulative_packet_lost, 0);
        assert_eq!(block.highest_sequence_number_received, 109);
    }

    #[test]
    fn gap_is_counted_as_loss() {
        let (mut stats, reference) = stats();
        stats.on_rtp_packet(100, 0, reference, reference);
        let lost = stats.on_rtp_packet(104, 0, reference, reference);
        assert_eq!(lost, 3);
        let block = stats.report_block(reference);
        assert_eq!(block.cumulative_packet_lost, 3);
        assert!(block.fraction_lost > 0);
    }

    #[test]
    fn wrap_increments_cycles() {
        let mut stats = SourceStats::new(1, 90000, 65534);
        let reference = Instant::now();
        stats.on_rtp_packet(65534, 0, reference, reference);
        stats.on_rtp_packet(65535, 0, reference, reference);
        stats.on_rtp_packet(0, 0, reference, reference);
        let block = stats.report_block(reference);
        assert_eq!(block.sequence_number_cycles, 1);
        assert_eq!(block.highest_sequence_number_received, 0);
    }

    #[test]
    fn duplicate_does_not_advance() {
        let (mut stats, reference) = stats();
        stats.on_rtp_packet(100, 0, reference, reference);
        stats.on_rtp_packet(100, 0, reference, reference);
        let block = stats.report_block(reference);
        assert_eq!(block.highest_sequence_number_received, 100);
    }

    #[test]
    fn last_sr_is_reflected_in_block() {
        let (mut stats, reference) = stats();
        stats.on_rtp_packet(100, 0, reference, reference);
        let ntp: SimpleNtp = 0x0123_4567_89AB_CDEF_u64.into();
        stats.on_sender_report(ntp, reference);
        let block = stats.report_block(reference + Duration::from_secs(1));
        assert_eq!(u32::from(block.last_sender_report_timestamp), 0x4567_89AB);
        // one second in 1/65536 units
        assert!((block.delay_since_last_sender_report as i64 - 65536).abs() < 256);
    }
}
