use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid rtp version: {0}")]
    InvalidVersion(u8),
    #[error("rtp packet too short: {0} bytes")]
    PacketTooShort(usize),
    #[error("unknown rtcp payload type: {0}")]
    UnknownRtcpPayloadType(u8),
    #[error("invalid rtcp packet: {0}")]
    InvalidRtcpPacket(String),
    #[error("too many report blocks: {0}")]
    TooManyReportBlocks(usize),
}

pub type RtpResult<T> = Result<T, RtpError>;
