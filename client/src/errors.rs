use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtspClientError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("rtsp message error: {0}")]
    RtspMessageError(#[from] rtsp_formats::errors::RtspMessageError),
    #[error("sdp error: {0}")]
    SdpError(#[from] sdp_formats::errors::SDPError),
    #[error("unified io error: {0}")]
    UnifiedIOError(#[from] unified_io::errors::UnifiedIOError),
    #[error("url error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("server replied with {code} {message}")]
    WrongStatusCode { code: u16, message: String },
    #[error("method not valid in state {0}")]
    InvalidState(&'static str),
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("no credentials in the url")]
    MissingCredentials,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("no UDP packets received recently")]
    NoUDPPacketsRecently,
    #[error("UDP read timed out")]
    UDPTimeout,
    #[error("TCP read timed out")]
    TCPTimeout,
    #[error("invalid rtp packet: {0}")]
    DecodeRtp(String),
    #[error("invalid rtcp packet: {0}")]
    DecodeRtcp(String),
    #[error("write queue is full")]
    WouldBlock,
    #[error("session terminated")]
    Terminated,
    #[error("session body is missing")]
    MissingSdp,
    #[error("no usable media in the description")]
    NoMedias,
}

impl RtspClientError {
    /// Errors that trigger the UDP-to-TCP downgrade when the transport was
    /// not pinned by configuration.
    pub fn triggers_tcp_downgrade(&self) -> bool {
        matches!(
            self,
            Self::NoUDPPacketsRecently | Self::WrongStatusCode { code: 461, .. }
        )
    }
}

pub type RtspClientResult<T> = Result<T, RtspClientError>;
