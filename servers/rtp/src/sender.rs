//! Sender-side RTCP accounting for one medium: running counters and
//! periodic sender reports.

use std::time::SystemTime;

use num::ToPrimitive;
use rtp_formats::{packet::RtpPacket, rtcp::sender_report::RtcpSenderReport};
use utils::random::random_u32;

pub struct RtcpSenderContext {
    ssrc: u32,
    clock_rate: u32,
    packet_count: u32,
    octet_count: u32,
    last_rtp_timestamp: Option<u32>,
    last_packet_wall_clock: Option<SystemTime>,
}

impl RtcpSenderContext {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            ssrc: random_u32(),
            clock_rate,
            packet_count: 0,
            octet_count: 0,
            last_rtp_timestamp: None,
            last_packet_wall_clock: None,
        }
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn on_rtp_packet(&mut self, packet: &RtpPacket, now: SystemTime) {
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self
            .octet_count
            .wrapping_add(packet.payload.len().to_u32().unwrap_or(0));
        self.last_rtp_timestamp = Some(packet.header.timestamp);
        self.last_packet_wall_clock = Some(now);
    }

    /// The SSRC every outgoing packet of this medium must carry.
    pub fn stamp(&self, packet: &mut RtpPacket) {
        packet.header.ssrc = self.ssrc;
    }

    /// Sender report with the RTP timestamp extrapolated from the last
    /// written packet to `now`; `None` before the first packet.
    pub fn generate_report(&self, now: SystemTime) -> Option<RtcpSenderReport> {
        let last_rtp_timestamp = self.last_rtp_timestamp?;
        let last_wall_clock = self.last_packet_wall_clock?;

        let elapsed = now
            .duration_since(last_wall_clock)
            .unwrap_or_default()
            .as_secs_f64();
        let rtp_timestamp = last_rtp_timestamp
            .wrapping_add((elapsed * self.clock_rate as f64) as u32);

        RtcpSenderReport::builder()
            .ssrc(self.ssrc)
            .ntp(now)
            .rtp_timestamp(rtp_timestamp)
            .packet_count(self.packet_count)
            .octet_count(self.octet_count)
            .build()
            .ok()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rtp_formats::header::RtpHeader;
    use tokio_util::bytes::Bytes;

    use super::*;

    fn rtp(timestamp: u32, payload_len: usize) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                timestamp,
                ..Default::default()
            },
            Bytes::from(vec![0_u8; payload_len]),
        )
    }

    #[test]
    fn no_report_before_first_packet() {
        let ctx = RtcpSenderContext::new(90000);
        assert!(ctx.generate_report(SystemTime::now()).is_none());
    }

    #[test]
    fn counters_accumulate() {
        let mut ctx = RtcpSenderContext::new(90000);
        let now = SystemTime::now();
        ctx.on_rtp_packet(&rtp(0, 100), now);
        ctx.on_rtp_packet(&rtp(3000, 200), now);
        let report = ctx.generate_report(now).unwrap();
        assert_eq!(report.sender_info.sender_packet_count, 2);
        assert_eq!(report.sender_info.sender_octet_count, 300);
    }

    #[test]
    fn rtp_timestamp_extrapolates_with_wall_clock() {
        let mut ctx = RtcpSenderContext::new(90000);
        let now = SystemTime::now();
        ctx.on_rtp_packet(&rtp(1000, 10), now);
        let report = ctx
            .generate_report(now + Duration::from_secs(1))
            .unwrap();
        let advanced = report.sender_info.rtp_timestamp.wrapping_sub(1000);
        assert!((advanced as i64 - 90000).abs() < 900, "advanced {}", advanced);
    }

    #[test]
    fn stamp_rewrites_ssrc() {
        let ctx = RtcpSenderContext::new(90000).with_ssrc(0xCAFE_F00D);
        let mut packet = rtp(0, 4);
        ctx.stamp(&mut packet);
        assert_eq!(packet.header.ssrc, 0xCAFE_F00D);
    }
}
