//! Receiver-side RTCP accounting for one medium: per-SSRC statistics and
//! periodic receiver reports.

use std::{collections::HashMap, time::Instant};

use rtp_formats::{
    packet::RtpPacket,
    rtcp::{RtcpPacket, receiver_report::RtcpReceiverReport},
};
use utils::random::random_u32;

use crate::{
    errors::{RtpSessionError, RtpSessionResult},
    source_stats::SourceStats,
};

pub struct RtcpReceiverContext {
    local_ssrc: u32,
    clock_rate: u32,
    /// The medium's sender identity. The first SR on an unbound medium binds
    /// it; later mismatches are decode errors.
    bound_ssrc: Option<u32>,
    sources: HashMap<u32, SourceStats>,
    arrival_reference: Instant,
}

impl RtcpReceiverContext {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            local_ssrc: random_u32(),
            clock_rate,
            bound_ssrc: None,
            sources: HashMap::new(),
            arrival_reference: Instant::now(),
        }
    }

    pub fn with_bound_ssrc(mut self, ssrc: u32) -> Self {
        self.bound_ssrc = Some(ssrc);
        self
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn bound_ssrc(&self) -> Option<u32> {
        self.bound_ssrc
    }

    /// Records an arrival; returns how many packets went missing right in
    /// front of it.
    pub fn on_rtp_packet(&mut self, packet: &RtpPacket, arrival: Instant) -> u64 {
        let header = &packet.header;
        if self.bound_ssrc.is_none() {
            self.bound_ssrc = Some(header.ssrc);
        }
        let reference = self.arrival_reference;
        let clock_rate = self.clock_rate;
        self.sources
            .entry(header.ssrc)
            .or_insert_with(|| {
                SourceStats::new(header.ssrc, clock_rate, header.sequence_number)
            })
            .on_rtp_packet(header.sequence_number, header.timestamp, arrival, reference)
    }

    /// Digests one decoded RTCP packet arriving on the medium's RTCP path.
    pub fn on_rtcp_packet(
        &mut self,
        packet: &RtcpPacket,
        arrival: Instant,
    ) -> RtpSessionResult<()> {
        let RtcpPacket::SenderReport(sr) = packet else {
            return Ok(());
        };
        match self.bound_ssrc {
            None => {
                tracing::debug!("binding medium to ssrc {:#010x} from first sender report", sr.ssrc);
                self.bound_ssrc = Some(sr.ssrc);
            }
            Some(bound) if bound != sr.ssrc => {
                return Err(RtpSessionError::SsrcMismatch {
                    bound,
                    got: sr.ssrc,
                });
            }
            Some(_) => {}
        }
        let clock_rate = self.clock_rate;
        self.sources
            .entry(sr.ssrc)
            .or_insert_with(|| SourceStats::new(sr.ssrc, clock_rate, 0))
            .on_sender_report(sr.sender_info.ntp_timestamp, arrival);
        Ok(())
    }

    /// One RR block per observed SSRC; `None` until any packet arrived.
    pub fn generate_report(&mut self, now: Instant) -> Option<RtcpReceiverReport> {
        if self.sources.is_empty() {
            return None;
        }
        let blocks = self
            .sources
            .values_mut()
            .take(31)
            .map(|source| source.report_block(now))
            .collect();
        RtcpReceiverReport::builder()
            .ssrc(self.local_ssrc)
            .report_blocks(blocks)
            .build()
            .ok()
    }
}

#[cfg(test)]
mod test {
    use rtp_formats::{
        header::RtpHeader,
        rtcp::sender_report::RtcpSenderReport,
    };
    use tokio_util::bytes::Bytes;

    use super::*;

    fn rtp(ssrc: u32, seq: u16) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                ssrc,
                sequence_number: seq,
                ..Default::default()
            },
            Bytes::from_static(&[0; 8]),
        )
    }

    #[test]
    fn first_rtp_packet_binds_ssrc() {
        let mut ctx = RtcpReceiverContext::new(90000);
        assert_eq!(ctx.bound_ssrc(), None);
        ctx.on_rtp_packet(&rtp(0xABCD, 1), Instant::now());
        assert_eq!(ctx.bound_ssrc(), Some(0xABCD));
    }

    #[test]
    fn first_sr_binds_then_mismatch_is_error() {
        let mut ctx = RtcpReceiverContext::new(90000);
        let now = Instant::now();

        let sr = RtcpSenderReport::builder().ssrc(0x1111).build().unwrap();
        ctx.on_rtcp_packet(&RtcpPacket::SenderReport(sr), now)
            .unwrap();
        assert_eq!(ctx.bound_ssrc(), Some(0x1111));

        let other = RtcpSenderReport::builder().ssrc(0x2222).build().unwrap();
        let err = ctx
            .on_rtcp_packet(&RtcpPacket::SenderReport(other), now)
            .unwrap_err();
        assert!(matches!(
            err,
            RtpSessionError::SsrcMismatch {
                bound: 0x1111,
                got: 0x2222
            }
        ));
    }

    #[test]
    fn report_covers_observed_sources() {
        let mut ctx = RtcpReceiverContext::new(90000);
        let now = Instant::now();
        assert!(ctx.generate_report(now).is_none());

        ctx.on_rtp_packet(&rtp(0xABCD, 1), now);
        ctx.on_rtp_packet(&rtp(0xABCD, 2), now);
        let report = ctx.generate_report(now).unwrap();
        assert_eq!(report.report_blocks.len(), 1);
        assert_eq!(report.report_blocks[0].ssrc, 0xABCD);
        assert_eq!(report.ssrc, ctx.local_ssrc());
    }

    #[test]
    fn loss_delta_surfaces_per_packet() {
        let mut ctx = RtcpReceiverContext::new(90000);
        let now = Instant::now();
        assert_eq!(ctx.on_rtp_packet(&rtp(1, 10), now), 0);
        assert_eq!(ctx.on_rtp_packet(&rtp(1, 11), now), 0);
        assert_eq!(ctx.on_rtp_packet(&rtp(1, 15), now), 3);
    }
}
