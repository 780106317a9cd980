use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    fixed_packet::FixedPacket,
    reader::{ReadFrom, ReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::RtpError;

use super::{RtcpPayloadType, common_header::RtcpCommonHeader, report_block::ReportBlock};

/// @see: RFC 3550 6.4.2 RR: Receiver Report RTCP Packet
#[derive(Debug, Default, Clone)]
pub struct RtcpReceiverReport {
    pub ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

impl RtcpReceiverReport {
    pub fn builder() -> RtcpReceiverReportBuilder {
        Default::default()
    }

    fn common_header(&self) -> RtcpCommonHeader {
        RtcpCommonHeader {
            version: 2,
            padding: false,
            count: self.report_blocks.len() as u8,
            payload_type: RtcpPayloadType::ReceiverReport,
            length: ((self.get_packet_bytes_count() - RtcpCommonHeader::bytes_count()) / 4)
                as u16,
        }
    }
}

impl DynamicSizedPacket for RtcpReceiverReport {
    fn get_packet_bytes_count(&self) -> usize {
        RtcpCommonHeader::bytes_count()
            + 4 // ssrc
            + self.report_blocks.len() * ReportBlock::bytes_count()
    }
}

impl<R: io::Read> ReadRemainingFrom<RtcpCommonHeader, R> for RtcpReceiverReport {
    type Error = RtpError;
    fn read_remaining_from(header: RtcpCommonHeader, mut reader: R) -> Result<Self, Self::Error> {
        let ssrc = reader.read_u32::<BigEndian>()?;
        let mut report_blocks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            report_blocks.push(ReportBlock::read_from(&mut reader)?);
        }
        Ok(Self {
            ssrc,
            report_blocks,
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtcpReceiverReport {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.common_header().write_to(writer)?;
        writer.write_u32::<BigEndian>(self.ssrc)?;
        self.report_blocks
            .iter()
            .try_for_each(|block| block.write_to(writer))
    }
}

#[derive(Debug, Default)]
pub struct RtcpReceiverReportBuilder(RtcpReceiverReport);

impl RtcpReceiverReportBuilder {
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.0.ssrc = ssrc;
        self
    }

    pub fn report_blocks(mut self, report_blocks: Vec<ReportBlock>) -> Self {
        self.0.report_blocks = report_blocks;
        self
    }

    pub fn build(self) -> Result<RtcpReceiverReport, RtpError> {
        if self.0.report_blocks.len() > 31 {
            return Err(RtpError::TooManyReportBlocks(self.0.report_blocks.len()));
        }
        Ok(self.0)
    }
}
