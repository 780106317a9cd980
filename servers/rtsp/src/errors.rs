use rtsp_formats::consts::status::RtspStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtspServerError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("rtsp message error: {0}")]
    RtspMessageError(#[from] rtsp_formats::errors::RtspMessageError),
    #[error("sdp error: {0}")]
    SdpError(#[from] sdp_formats::errors::SDPError),
    #[error("unified io error: {0}")]
    UnifiedIOError(#[from] unified_io::errors::UnifiedIOError),

    #[error("CSeq is missing")]
    CSeqMissing,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("method not valid in state {0}")]
    InvalidState(&'static str),
    #[error("invalid transport: {0}")]
    InvalidTransport(String),
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("all SETUPs in a session must share one path, got {0}")]
    SetupDifferentPaths(String),
    #[error("track {0} is already set up")]
    SetupTrackTwice(usize),
    #[error("transport family cannot change after the first SETUP")]
    SetupTransportCannotChange,
    #[error("session is linked to another connection")]
    SessionLinkedToOtherConnection,
    #[error("connection is linked to another session")]
    ConnLinkedToOtherSession,
    #[error("interleaved channel {0} is already in use")]
    InvalidChannel(u8),
    #[error("authentication failed")]
    AuthFailed,
    #[error("invalid UDP ports: {0}")]
    InvalidUDPPorts(String),
    #[error("invalid rtp packet: {0}")]
    DecodeRtp(String),
    #[error("invalid rtcp packet: {0}")]
    DecodeRtcp(String),
    #[error("write queue overflowed")]
    OverflowedBuffer,
    #[error("session timed out")]
    SessionTimedOut,
    #[error("terminated")]
    Terminated,
    #[error("graceful exit")]
    GracefulExit,
}

impl RtspServerError {
    /// The RTSP status a request-path error maps onto; transport-level
    /// errors have none.
    pub fn status(&self) -> Option<RtspStatus> {
        match self {
            Self::CSeqMissing
            | Self::InvalidPath(_)
            | Self::SetupDifferentPaths(_)
            | Self::SetupTrackTwice(_)
            | Self::SessionLinkedToOtherConnection
            | Self::ConnLinkedToOtherSession
            | Self::InvalidChannel(_) => Some(RtspStatus::BadRequest),
            Self::InvalidState(_) => Some(RtspStatus::MethodNotValidInThisState),
            Self::SessionNotFound(_) => Some(RtspStatus::SessionNotFound),
            Self::InvalidTransport(_)
            | Self::UnsupportedTransport(_)
            | Self::SetupTransportCannotChange => Some(RtspStatus::UnsupportedTransport),
            Self::AuthFailed => Some(RtspStatus::Unauthorized),
            Self::RtspMessageError(_) | Self::SdpError(_) => Some(RtspStatus::BadRequest),
            _ => None,
        }
    }
}

pub type RtspServerResult<T> = Result<T, RtspServerError>;
