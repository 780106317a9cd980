use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtpSessionError {
    #[error("rtp format error: {0}")]
    RtpFormatError(#[from] rtp_formats::errors::RtpError),
    #[error("rtcp ssrc {got:#010x} does not match the bound ssrc {bound:#010x}")]
    SsrcMismatch { bound: u32, got: u32 },
}

pub type RtpSessionResult<T> = Result<T, RtpSessionError>;
