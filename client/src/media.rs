//! Per-track client state: the UDP listener pair, the bound remote, the
//! last-packet clock and the RTCP accounting.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use rtp_session::{receiver::RtcpReceiverContext, sender::RtcpSenderContext};
use sdp_formats::media::MediaDescription;
use unified_io::udp::{UdpListener, UdpListenerConfig};
use url::Url;
use utils::random::random_even_u16;

use crate::errors::{RtspClientError, RtspClientResult};

const UDP_PORT_RANGE: (u16, u16) = (10000, 65534);
const UDP_BIND_ATTEMPTS: usize = 16;

pub(crate) fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) struct ClientSessionMedia {
    pub track_id: usize,
    pub media: MediaDescription,
    pub control_url: Url,

    pub rtp_listener: Option<Arc<UdpListener>>,
    pub rtcp_listener: Option<Arc<UdpListener>>,
    pub remote_rtp_addr: Option<SocketAddr>,
    pub remote_rtcp_addr: Option<SocketAddr>,
    pub interleaved: Option<(u8, u8)>,

    /// Stamped by the listener hooks; the liveness ticker reads it.
    pub last_packet_unix_ms: Arc<AtomicI64>,
    pub receiver_context: Option<Arc<Mutex<RtcpReceiverContext>>>,
    pub sender_context: Option<Arc<Mutex<RtcpSenderContext>>>,
}

impl ClientSessionMedia {
    pub fn new(track_id: usize, media: MediaDescription, control_url: Url) -> Self {
        Self {
            track_id,
            media,
            control_url,
            rtp_listener: None,
            rtcp_listener: None,
            remote_rtp_addr: None,
            remote_rtcp_addr: None,
            interleaved: None,
            last_packet_unix_ms: Arc::new(AtomicI64::new(0)),
            receiver_context: None,
            sender_context: None,
        }
    }

    pub fn touch(&self) {
        self.last_packet_unix_ms
            .store(unix_now_ms(), Ordering::Relaxed);
    }

    pub fn last_packet_ms(&self) -> i64 {
        self.last_packet_unix_ms.load(Ordering::Relaxed)
    }

    pub async fn close_listeners(&mut self) {
        if let Some(listener) = self.rtp_listener.take() {
            listener.close().await;
        }
        if let Some(listener) = self.rtcp_listener.take() {
            listener.close().await;
        }
    }
}

/// Binds an even/odd consecutive pair, retrying over random even picks in
/// 10000-65534.
pub(crate) async fn bind_udp_pair(
    max_packet_size: usize,
    write_timeout: std::time::Duration,
    any_port: bool,
    multicast_group: Option<std::net::Ipv4Addr>,
    ports: Option<(u16, u16)>,
) -> RtspClientResult<(UdpListener, UdpListener)> {
    let config = UdpListenerConfig {
        multicast_group,
        max_packet_size,
        write_timeout,
        any_port,
    };
    for _ in 0..UDP_BIND_ATTEMPTS {
        let (rtp_port, rtcp_port) = ports.unwrap_or_else(|| {
            let rtp_port = random_even_u16(UDP_PORT_RANGE.0, UDP_PORT_RANGE.1);
            (rtp_port, rtp_port + 1)
        });
        let rtp_addr: SocketAddr = SocketAddr::new("0.0.0.0".parse().unwrap(), rtp_port);
        let rtcp_addr: SocketAddr = SocketAddr::new("0.0.0.0".parse().unwrap(), rtcp_port);

        let rtp = match UdpListener::bind(rtp_addr, config.clone()).await {
            Ok(listener) => listener,
            Err(_) if ports.is_none() => continue,
            Err(err) => return Err(err.into()),
        };
        match UdpListener::bind(rtcp_addr, config.clone()).await {
            Ok(rtcp) => return Ok((rtp, rtcp)),
            Err(_) if ports.is_none() => {
                rtp.close().await;
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(RtspClientError::IoError(std::io::Error::other(
        "could not bind a consecutive UDP port pair",
    )))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn pair_ports_are_even_and_consecutive() {
        for _ in 0..8 {
            let (rtp, rtcp) =
                bind_udp_pair(1472, Duration::from_secs(1), false, None, None)
                    .await
                    .unwrap();
            assert_eq!(rtp.local_port() % 2, 0, "rtp port must be even");
            assert_eq!(rtcp.local_port(), rtp.local_port() + 1);
            rtp.close().await;
            rtcp.close().await;
        }
    }

    #[tokio::test]
    async fn fixed_ports_are_honored() {
        let (rtp, rtcp) = bind_udp_pair(
            1472,
            Duration::from_secs(1),
            false,
            None,
            Some((36000, 36001)),
        )
        .await
        .unwrap();
        assert_eq!(rtp.local_port(), 36000);
        assert_eq!(rtcp.local_port(), 36001);
        rtp.close().await;
        rtcp.close().await;
    }
}
