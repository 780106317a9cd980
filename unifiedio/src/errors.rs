use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnifiedIOError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
    #[error("listener is closed")]
    ListenerClosed,
    #[error("oversized datagram of at least {0} bytes")]
    OversizedDatagram(usize),
}

pub type UnifiedIOResult<T> = Result<T, UnifiedIOError>;
