use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    fixed_packet::FixedPacket,
    reader::{ReadFrom, ReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::RtpError;

use super::{
    RtcpPayloadType, common_header::RtcpCommonHeader, report_block::ReportBlock,
    simple_ntp::SimpleNtp,
};

#[derive(Debug, Default, Clone)]
pub struct SenderInfo {
    pub ntp_timestamp: SimpleNtp,
    pub rtp_timestamp: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
}

impl FixedPacket for SenderInfo {
    fn bytes_count() -> usize {
        20
    }
}

impl<R: io::Read> ReadFrom<R> for SenderInfo {
    type Error = RtpError;
    fn read_from(mut reader: R) -> Result<Self, Self::Error> {
        Ok(Self {
            ntp_timestamp: reader.read_u64::<BigEndian>()?.into(),
            rtp_timestamp: reader.read_u32::<BigEndian>()?,
            sender_packet_count: reader.read_u32::<BigEndian>()?,
            sender_octet_count: reader.read_u32::<BigEndian>()?,
        })
    }
}

impl<W: io::Write> WriteTo<W> for SenderInfo {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        writer.write_u64::<BigEndian>(self.ntp_timestamp.into())?;
        writer.write_u32::<BigEndian>(self.rtp_timestamp)?;
        writer.write_u32::<BigEndian>(self.sender_packet_count)?;
        writer.write_u32::<BigEndian>(self.sender_octet_count)?;
        Ok(())
    }
}

/// @see: RFC 3550 6.4.1 SR: Sender Report RTCP Packet
#[derive(Debug, Default, Clone)]
pub struct RtcpSenderReport {
    pub ssrc: u32,
    pub sender_info: SenderInfo,
    pub report_blocks: Vec<ReportBlock>,
}

impl RtcpSenderReport {
    pub fn builder() -> RtcpSenderReportBuilder {
        Default::default()
    }

    fn common_header(&self) -> RtcpCommonHeader {
        RtcpCommonHeader {
            version: 2,
            padding: false,
            count: self.report_blocks.len() as u8,
            payload_type: RtcpPayloadType::SenderReport,
            length: ((self.get_packet_bytes_count() - RtcpCommonHeader::bytes_count()) / 4)
                as u16,
        }
    }
}

impl DynamicSizedPacket for RtcpSenderReport {
    fn get_packet_bytes_count(&self) -> usize {
        RtcpCommonHeader::bytes_count()
            + 4 // ssrc
            + SenderInfo::bytes_count()
            + self.report_blocks.len() * ReportBlock::bytes_count()
    }
}

impl<R: io::Read> ReadRemainingFrom<RtcpCommonHeader, R> for RtcpSenderReport {
    type Error = RtpError;
    fn read_remaining_from(header: RtcpCommonHeader, mut reader: R) -> Result<Self, Self::Error> {
        let ssrc = reader.read_u32::<BigEndian>()?;
        let sender_info = SenderInfo::read_from(&mut reader)?;
        let mut report_blocks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            report_blocks.push(ReportBlock::read_from(&mut reader)?);
        }
        Ok(Self {
            ssrc,
            sender_info,
            report_blocks,
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtcpSenderReport {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.common_header().write_to(writer)?;
        writer.write_u32::<BigEndian>(self.ssrc)?;
        self.sender_info.write_to(writer)?;
        self.report_blocks
            .iter()
            .try_for_each(|block| block.write_to(writer))
    }
}

#[derive(Debug, Default)]
pub struct RtcpSenderReportBuilder(RtcpSenderReport);

impl RtcpSenderReportBuilder {
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.0.ssrc = ssrc;
        self
    }

    pub fn ntp<T: Into<SimpleNtp>>(mut self, ntp: T) -> Self {
        self.0.sender_info.ntp_timestamp = ntp.into();
        self
    }

    pub fn rtp_timestamp(mut self, rtp_timestamp: u32) -> Self {
        self.0.sender_info.rtp_timestamp = rtp_timestamp;
        self
    }

    pub fn packet_count(mut self, packet_count: u32) -> Self {
        self.0.sender_info.sender_packet_count = packet_count;
        self
    }

    pub fn octet_count(mut self, octet_count: u32) -> Self {
        self.0.sender_info.sender_octet_count = octet_count;
        self
    }

    pub fn report_blocks(mut self, report_blocks: Vec<ReportBlock>) -> Self {
        self.0.report_blocks = report_blocks;
        self
    }

    pub fn build(self) -> Result<RtcpSenderReport, RtpError> {
        if self.0.report_blocks.len() > 31 {
            return Err(RtpError::TooManyReportBlocks(self.0.report_blocks.len()));
        }
        Ok(self.0)
    }
}
