pub mod common_header;
pub mod compound_packet;
pub mod receiver_report;
pub mod report_block;
pub mod sender_report;
pub mod simple_ntp;

use std::io::{self, Cursor, Read};

use common_header::RtcpCommonHeader;
use receiver_report::RtcpReceiverReport;
use sender_report::RtcpSenderReport;
use tokio_util::bytes::{Buf, Bytes};
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    fixed_packet::FixedPacket,
    reader::{ReadRemainingFrom, TryReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::RtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RtcpPayloadType {
    #[default]
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Bye,
    App,
}

impl TryFrom<u8> for RtcpPayloadType {
    type Error = RtpError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(Self::SenderReport),
            201 => Ok(Self::ReceiverReport),
            202 => Ok(Self::SourceDescription),
            203 => Ok(Self::Bye),
            204 => Ok(Self::App),
            other => Err(RtpError::UnknownRtcpPayloadType(other)),
        }
    }
}

impl From<RtcpPayloadType> for u8 {
    fn from(value: RtcpPayloadType) -> Self {
        match value {
            RtcpPayloadType::SenderReport => 200,
            RtcpPayloadType::ReceiverReport => 201,
            RtcpPayloadType::SourceDescription => 202,
            RtcpPayloadType::Bye => 203,
            RtcpPayloadType::App => 204,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    /// SDES/BYE/APP packets are carried opaque; the session layers do not
    /// interpret them.
    Other {
        header: RtcpCommonHeader,
        payload: Bytes,
    },
}

impl RtcpPacket {
    pub fn sender_ssrc(&self) -> Option<u32> {
        match self {
            Self::SenderReport(sr) => Some(sr.ssrc),
            Self::ReceiverReport(rr) => Some(rr.ssrc),
            Self::Other { .. } => None,
        }
    }
}

impl<R: AsRef<[u8]>> TryReadRemainingFrom<RtcpCommonHeader, R> for RtcpPacket {
    type Error = RtpError;
    fn try_read_remaining_from(
        header: RtcpCommonHeader,
        reader: &mut Cursor<R>,
    ) -> Result<Option<Self>, Self::Error> {
        let bytes_remaining = (header.length as usize) * 4;
        if reader.remaining() < bytes_remaining {
            return Ok(None);
        }

        let mut remaining_bytes = vec![0_u8; bytes_remaining];
        reader.read_exact(&mut remaining_bytes)?;

        // ignore padding bytes
        if header.padding && !remaining_bytes.is_empty() {
            let padding_bytes = *remaining_bytes.last().unwrap() as usize;
            if padding_bytes > remaining_bytes.len() {
                return Err(RtpError::InvalidRtcpPacket(format!(
                    "padding {} longer than packet {}",
                    padding_bytes,
                    remaining_bytes.len()
                )));
            }
            remaining_bytes.truncate(remaining_bytes.len() - padding_bytes);
        }

        let cursor = Cursor::new(remaining_bytes.as_slice());
        match header.payload_type {
            RtcpPayloadType::SenderReport => Ok(Some(Self::SenderReport(
                RtcpSenderReport::read_remaining_from(header, cursor)?,
            ))),
            RtcpPayloadType::ReceiverReport => Ok(Some(Self::ReceiverReport(
                RtcpReceiverReport::read_remaining_from(header, cursor)?,
            ))),
            _ => Ok(Some(Self::Other {
                header,
                payload: Bytes::from(remaining_bytes),
            })),
        }
    }
}

impl<W: io::Write> WriteTo<W> for RtcpPacket {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        match self {
            Self::SenderReport(packet) => packet.write_to(writer),
            Self::ReceiverReport(packet) => packet.write_to(writer),
            Self::Other { header, payload } => {
                header.write_to(writer)?;
                writer.write_all(payload)?;
                Ok(())
            }
        }
    }
}

impl DynamicSizedPacket for RtcpPacket {
    fn get_packet_bytes_count(&self) -> usize {
        match self {
            Self::SenderReport(packet) => packet.get_packet_bytes_count(),
            Self::ReceiverReport(packet) => packet.get_packet_bytes_count(),
            Self::Other { payload, .. } => RtcpCommonHeader::bytes_count() + payload.len(),
        }
    }
}
