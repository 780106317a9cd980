//! User callback bundle. All callbacks run on the session task or the UDP
//! reader tasks and must not block.

use std::sync::Arc;

use rtp_formats::{packet::RtpPacket, rtcp::RtcpPacket};

use crate::errors::RtspClientError;

pub type OnPacketRtp = Arc<dyn Fn(usize, RtpPacket) + Send + Sync>;
pub type OnPacketRtcp = Arc<dyn Fn(usize, RtcpPacket) + Send + Sync>;
pub type OnDecodeError = Arc<dyn Fn(&RtspClientError) + Send + Sync>;
pub type OnPacketLost = Arc<dyn Fn(usize, u64) + Send + Sync>;
pub type OnTransportError = Arc<dyn Fn(&RtspClientError) + Send + Sync>;

#[derive(Default, Clone)]
pub struct ClientCallbacks {
    /// Media delivery: track id plus the decoded packet.
    pub on_packet_rtp: Option<OnPacketRtp>,
    pub on_packet_rtcp: Option<OnPacketRtcp>,
    /// Malformed RTP/RTCP; the session keeps running.
    pub on_decode_error: Option<OnDecodeError>,
    pub on_packet_lost: Option<OnPacketLost>,
    /// The error that terminated the background loop.
    pub on_transport_error: Option<OnTransportError>,
}

impl ClientCallbacks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_on_packet_rtp<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, RtpPacket) + Send + Sync + 'static,
    {
        self.on_packet_rtp = Some(Arc::new(callback));
        self
    }

    pub fn with_on_packet_rtcp<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, RtcpPacket) + Send + Sync + 'static,
    {
        self.on_packet_rtcp = Some(Arc::new(callback));
        self
    }

    pub fn with_on_decode_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RtspClientError) + Send + Sync + 'static,
    {
        self.on_decode_error = Some(Arc::new(callback));
        self
    }

    pub fn with_on_packet_lost<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, u64) + Send + Sync + 'static,
    {
        self.on_packet_lost = Some(Arc::new(callback));
        self
    }

    pub fn with_on_transport_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RtspClientError) + Send + Sync + 'static,
    {
        self.on_transport_error = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("on_packet_rtp", &self.on_packet_rtp.is_some())
            .field("on_packet_rtcp", &self.on_packet_rtcp.is_some())
            .field("on_decode_error", &self.on_decode_error.is_some())
            .field("on_packet_lost", &self.on_packet_lost.is_some())
            .field("on_transport_error", &self.on_transport_error.is_some())
            .finish()
    }
}
