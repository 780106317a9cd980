use std::io::{self, Cursor};

use tokio_util::bytes::{Buf, Bytes};
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    reader::{TryReadFrom, TryReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::RtpError;

use super::{RtcpPacket, common_header::RtcpCommonHeader};

/// A sequence of RTCP packets sharing one datagram or interleaved frame.
#[derive(Debug, Default, Clone)]
pub struct RtcpCompoundPacket {
    packets: Vec<RtcpPacket>,
}

impl RtcpCompoundPacket {
    pub fn builder() -> RtcpCompoundPacketBuilder {
        Default::default()
    }

    pub fn packets(&self) -> &[RtcpPacket] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<RtcpPacket> {
        self.packets
    }

    pub fn parse(data: &[u8]) -> Result<Self, RtpError> {
        let mut cursor = Cursor::new(data);
        match Self::try_read_from(&mut cursor)? {
            Some(compound) => Ok(compound),
            None => Err(RtpError::InvalidRtcpPacket(format!(
                "truncated rtcp compound packet of {} bytes",
                data.len()
            ))),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, RtpError> {
        let mut buffer = Vec::with_capacity(self.get_packet_bytes_count());
        self.write_to(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }
}

impl DynamicSizedPacket for RtcpCompoundPacket {
    fn get_packet_bytes_count(&self) -> usize {
        self.packets
            .iter()
            .map(|packet| packet.get_packet_bytes_count())
            .sum()
    }
}

impl<R: AsRef<[u8]>> TryReadFrom<R> for RtcpCompoundPacket {
    type Error = RtpError;
    fn try_read_from(reader: &mut Cursor<R>) -> Result<Option<Self>, Self::Error> {
        let mut packets = Vec::new();
        while reader.has_remaining() {
            let Some(header) = RtcpCommonHeader::try_read_from(reader)? else {
                return Ok(None);
            };
            let Some(packet) = RtcpPacket::try_read_remaining_from(header, reader)? else {
                return Ok(None);
            };
            packets.push(packet);
        }
        if packets.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { packets }))
    }
}

impl<W: io::Write> WriteTo<W> for RtcpCompoundPacket {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.packets
            .iter()
            .try_for_each(|packet| packet.write_to(writer))
    }
}

#[derive(Debug, Default)]
pub struct RtcpCompoundPacketBuilder(RtcpCompoundPacket);

impl RtcpCompoundPacketBuilder {
    pub fn packet(mut self, packet: RtcpPacket) -> Self {
        self.0.packets.push(packet);
        self
    }

    pub fn packets(mut self, mut packets: Vec<RtcpPacket>) -> Self {
        self.0.packets.append(&mut packets);
        self
    }

    pub fn build(self) -> RtcpCompoundPacket {
        self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtcp::{
        receiver_report::RtcpReceiverReport, report_block::ReportBlock,
        sender_report::RtcpSenderReport,
    };

    #[test]
    fn receiver_report_round_trip() {
        let report = RtcpReceiverReport::builder()
            .ssrc(0x1111_2222)
            .report_blocks(vec![
                ReportBlock::builder()
                    .ssrc(0xAAAA_BBBB)
                    .fraction_lost(12)
                    .cumulative_packet_lost(34)
                    .highest_sequence_number_received(5678)
                    .highest_sequence_number_cycles(1)
                    .interarrival_jitter(90)
                    .last_sr(0x1234_5678_u32)
                    .delay_since_last_sr(100)
                    .build(),
            ])
            .build()
            .unwrap();
        let compound = RtcpCompoundPacket::builder()
            .packet(RtcpPacket::ReceiverReport(report))
            .build();

        let bytes = compound.to_bytes().unwrap();
        assert_eq!(bytes.len() % 4, 0);

        let parsed = RtcpCompoundPacket::parse(&bytes).unwrap();
        let RtcpPacket::ReceiverReport(rr) = &parsed.packets()[0] else {
            panic!("expected receiver report");
        };
        assert_eq!(rr.ssrc, 0x1111_2222);
        assert_eq!(rr.report_blocks.len(), 1);
        let block = &rr.report_blocks[0];
        assert_eq!(block.ssrc, 0xAAAA_BBBB);
        assert_eq!(block.fraction_lost, 12);
        assert_eq!(block.highest_sequence_number_received, 5678);
        assert_eq!(block.sequence_number_cycles, 1);
        assert_eq!(u32::from(block.last_sender_report_timestamp), 0x1234_5678);
    }

    #[test]
    fn sender_report_round_trip() {
        let report = RtcpSenderReport::builder()
            .ssrc(0xDEAD_BEEF)
            .ntp(0x0011_2233_4455_6677_u64)
            .rtp_timestamp(90_000)
            .packet_count(250)
            .octet_count(300_000)
            .build()
            .unwrap();
        let bytes = RtcpCompoundPacket::builder()
            .packet(RtcpPacket::SenderReport(report))
            .build()
            .to_bytes()
            .unwrap();

        let parsed = RtcpCompoundPacket::parse(&bytes).unwrap();
        let RtcpPacket::SenderReport(sr) = &parsed.packets()[0] else {
            panic!("expected sender report");
        };
        assert_eq!(sr.ssrc, 0xDEAD_BEEF);
        assert_eq!(u64::from(sr.sender_info.ntp_timestamp), 0x0011_2233_4455_6677);
        assert_eq!(sr.sender_info.sender_packet_count, 250);
    }

    #[test]
    fn sr_then_rr_in_one_datagram() {
        let sr = RtcpSenderReport::builder().ssrc(1).build().unwrap();
        let rr = RtcpReceiverReport::builder().ssrc(2).build().unwrap();
        let bytes = RtcpCompoundPacket::builder()
            .packet(RtcpPacket::SenderReport(sr))
            .packet(RtcpPacket::ReceiverReport(rr))
            .build()
            .to_bytes()
            .unwrap();
        let parsed = RtcpCompoundPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.packets().len(), 2);
    }

    #[test]
    fn truncated_packet_rejected() {
        let rr = RtcpReceiverReport::builder().ssrc(2).build().unwrap();
        let bytes = RtcpCompoundPacket::builder()
            .packet(RtcpPacket::ReceiverReport(rr))
            .build()
            .to_bytes()
            .unwrap();
        assert!(RtcpCompoundPacket::parse(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn empty_receiver_report_is_valid() {
        // keepalive RRs carry zero blocks
        let rr = RtcpReceiverReport::builder().ssrc(7).build().unwrap();
        let bytes = RtcpCompoundPacket::builder()
            .packet(RtcpPacket::ReceiverReport(rr))
            .build()
            .to_bytes()
            .unwrap();
        assert_eq!(bytes.len(), 8);
        let parsed = RtcpCompoundPacket::parse(&bytes).unwrap();
        let RtcpPacket::ReceiverReport(rr) = &parsed.packets()[0] else {
            panic!("expected receiver report");
        };
        assert!(rr.report_blocks.is_empty());
    }
}
