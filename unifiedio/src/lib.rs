use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

pub mod errors;
pub mod tcp;
pub mod udp;
pub mod write_queue;

pub enum UnderlyingIO {
    TCP {
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    },
    /// TLS- or HTTP-tunnel-wrapped streams report their inner addresses when
    /// known.
    Wrapped {
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    },
}

/// The byte-stream seam the connection cores read and write through. TCP is
/// provided here; TLS and HTTP-tunnel wrappers implement the same trait
/// outside this workspace.
pub trait UnifiedIO: AsyncRead + AsyncWrite + Send {
    fn get_underlying_io(&self) -> UnderlyingIO;
}
