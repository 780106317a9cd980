use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use rtsp_formats::header::auth::AuthAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Basic,
    DigestMd5,
    DigestSha256,
}

impl AuthMethod {
    pub fn digest_algorithm(&self) -> Option<AuthAlgorithm> {
        match self {
            Self::Basic => None,
            Self::DigestMd5 => Some(AuthAlgorithm::Md5),
            Self::DigestSha256 => Some(AuthAlgorithm::Sha256),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerAuthConfig {
    pub realm: String,
    pub username: String,
    pub password: String,
    pub methods: Vec<AuthMethod>,
}

#[derive(Debug, Clone)]
pub struct RtspServerConfig {
    pub rtsp_address: SocketAddr,
    /// Shared unicast UDP pair; both or neither. RTP even, RTCP = RTP + 1.
    pub udp_rtp_address: Option<SocketAddr>,
    pub udp_rtcp_address: Option<SocketAddr>,
    /// Base of the per-stream multicast group allocation.
    pub multicast_ip_range: Option<Ipv4Addr>,
    pub multicast_rtp_port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub write_buffer_count: usize,
    pub close_session_after_no_requests_for: Duration,
    pub sender_report_period: Duration,
    pub receiver_report_period: Duration,
    pub max_packet_size: usize,
    pub auth: Option<ServerAuthConfig>,
}

impl Default for RtspServerConfig {
    fn default() -> Self {
        Self {
            rtsp_address: "0.0.0.0:8554".parse().unwrap(),
            udp_rtp_address: None,
            udp_rtcp_address: None,
            multicast_ip_range: None,
            multicast_rtp_port: 5000,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            write_buffer_count: 256,
            close_session_after_no_requests_for: Duration::from_secs(60),
            sender_report_period: Duration::from_secs(10),
            receiver_report_period: Duration::from_secs(10),
            max_packet_size: 1472,
            auth: None,
        }
    }
}
