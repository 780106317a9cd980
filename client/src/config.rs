use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspTransport {
    Udp,
    UdpMulticast,
    Tcp,
}

#[derive(Debug, Clone)]
pub struct RtspClientConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub dial_timeout: Duration,
    /// `None` tries UDP first and downgrades to TCP when no packet shows up
    /// or the server refuses the SETUP.
    pub transport: Option<RtspTransport>,
    pub any_port_enable: bool,
    pub initial_udp_read_timeout: Duration,
    pub receiver_report_period: Duration,
    pub sender_report_period: Duration,
    pub keepalive_period: Duration,
    pub write_buffer_count: usize,
    pub redirect_disable: bool,
    pub max_packet_size: usize,
    pub user_agent: String,
}

impl Default for RtspClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            transport: None,
            any_port_enable: false,
            initial_udp_read_timeout: Duration::from_secs(3),
            receiver_report_period: Duration::from_secs(10),
            sender_report_period: Duration::from_secs(10),
            keepalive_period: Duration::from_secs(30),
            write_buffer_count: 256,
            redirect_disable: false,
            max_packet_size: 1472,
            user_agent: "yars/rtsp-client".to_owned(),
        }
    }
}
