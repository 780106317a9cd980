//! Datagram listener with a source-keyed dispatch table. One listener serves
//! one client socket (unicast) or many sessions at once (shared server and
//! multicast sockets).

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{net::UdpSocket, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::errors::{UnifiedIOError, UnifiedIOResult};

pub const MULTICAST_TTL: u32 = 16;

/// Datagram payload callback. Runs on the listener's reader task and must
/// not suspend.
pub type PacketHook = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Invoked for datagrams that exceed the configured packet size.
pub type DecodeErrorHook = Arc<dyn Fn(UnifiedIOError) + Send + Sync>;

/// Hashable source identity: 16-byte IP (IPv4 mapped into IPv6) plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceKey {
    ip: [u8; 16],
    port: u16,
}

impl SourceKey {
    fn ip_of(addr: &SocketAddr) -> [u8; 16] {
        match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }
}

impl From<SocketAddr> for SourceKey {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: Self::ip_of(&addr),
            port: addr.port(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UdpListenerConfig {
    /// Join this group on the default interface and fix the TTL at 16.
    pub multicast_group: Option<Ipv4Addr>,
    pub max_packet_size: usize,
    pub write_timeout: Duration,
    /// Relax the port half of the source filter once an address has matched
    /// by IP.
    pub any_port: bool,
}

impl Default for UdpListenerConfig {
    fn default() -> Self {
        Self {
            multicast_group: None,
            max_packet_size: 1472,
            write_timeout: Duration::from_secs(10),
            any_port: false,
        }
    }
}

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: UdpListenerConfig,
    hooks: Arc<RwLock<HashMap<SourceKey, PacketHook>>>,
    decode_error_hook: Arc<RwLock<Option<DecodeErrorHook>>>,
    any_port: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr, config: UdpListenerConfig) -> UnifiedIOResult<Self> {
        let socket = match config.multicast_group {
            None => UdpSocket::bind(addr).await?,
            Some(group) => {
                // multicast pairs share ports across streams, so the bind
                // needs SO_REUSEADDR
                let raw = socket2::Socket::new(
                    socket2::Domain::IPV4,
                    socket2::Type::DGRAM,
                    Some(socket2::Protocol::UDP),
                )?;
                raw.set_reuse_address(true)?;
                raw.set_nonblocking(true)?;
                raw.bind(&addr.into())?;
                let socket = UdpSocket::from_std(raw.into())?;
                socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
                socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
                socket.set_multicast_loop_v4(true)?;
                socket
            }
        };
        let local_addr = socket.local_addr()?;
        let any_port = config.any_port;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            config,
            hooks: Arc::new(RwLock::new(HashMap::new())),
            decode_error_hook: Arc::new(RwLock::new(None)),
            any_port: Arc::new(AtomicBool::new(any_port)),
            cancel: CancellationToken::new(),
            reader_handle: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn add_hook(&self, remote: SocketAddr, hook: PacketHook) {
        self.hooks.write().unwrap().insert(remote.into(), hook);
    }

    pub fn remove_hook(&self, remote: SocketAddr) {
        self.hooks.write().unwrap().remove(&SourceKey::from(remote));
    }

    pub fn set_decode_error_hook(&self, hook: DecodeErrorHook) {
        self.decode_error_hook.write().unwrap().replace(hook);
    }

    pub fn enable_any_port(&self) {
        self.any_port.store(true, Ordering::Relaxed);
    }

    /// Spawns the reader task. Packets from unknown sources are dropped
    /// silently; in any-port mode a source matching by IP is rebound to its
    /// observed port first.
    pub fn start(&self) {
        let mut guard = self.reader_handle.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let socket = self.socket.clone();
        let hooks = self.hooks.clone();
        let decode_error_hook = self.decode_error_hook.clone();
        let any_port = self.any_port.clone();
        let cancel = self.cancel.clone();
        let max_packet_size = self.config.max_packet_size;

        let handle = tokio::task::spawn(async move {
            // one spare byte detects oversized datagrams on read
            let mut buffer = vec![0_u8; max_packet_size + 1];
            loop {
                let (bytes_read, source) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok(received) => received,
                        Err(err) => {
                            tracing::debug!("udp reader stopping: {}", err);
                            break;
                        }
                    },
                };

                if bytes_read > max_packet_size {
                    if let Some(hook) = decode_error_hook.read().unwrap().as_ref() {
                        hook(UnifiedIOError::OversizedDatagram(bytes_read));
                    }
                    continue;
                }

                let key = SourceKey::from(source);
                let hook = {
                    let hooks = hooks.read().unwrap();
                    hooks.get(&key).cloned()
                };
                match hook {
                    Some(hook) => hook(&buffer[..bytes_read]),
                    None if any_port.load(Ordering::Relaxed) => {
                        let rebound = {
                            let mut hooks = hooks.write().unwrap();
                            let matched = hooks
                                .iter()
                                .find(|(existing, _)| existing.ip == key.ip)
                                .map(|(existing, hook)| (*existing, hook.clone()));
                            if let Some((old_key, hook)) = matched {
                                hooks.remove(&old_key);
                                hooks.insert(key, hook.clone());
                                Some(hook)
                            } else {
                                None
                            }
                        };
                        if let Some(hook) = rebound {
                            hook(&buffer[..bytes_read]);
                        }
                    }
                    None => {
                        // not ours, drop
                    }
                }
            }
            tracing::debug!("udp reader done");
        });
        guard.replace(handle);
    }

    pub async fn write_to(&self, payload: &[u8], remote: SocketAddr) -> UnifiedIOResult<()> {
        match tokio::time::timeout(
            self.config.write_timeout,
            self.socket.send_to(payload, remote),
        )
        .await
        {
            Err(_) => Err(UnifiedIOError::WriteTimeout(self.config.write_timeout)),
            Ok(Err(err)) => Err(UnifiedIOError::Io(err)),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Stops the reader task and waits for it to finish. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.reader_handle.lock().unwrap().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!("udp reader task join failed: {}", err);
        }
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc;

    use super::*;

    async fn bind_local(config: UdpListenerConfig) -> UdpListener {
        UdpListener::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn dispatches_to_matching_source() {
        let listener = bind_local(Default::default()).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender_addr = sender.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        listener.add_hook(
            sender_addr,
            Arc::new(move |payload| {
                tx.send(payload.to_vec()).unwrap();
            }),
        );
        listener.start();

        sender
            .send_to(&[1, 2, 3], listener.local_addr())
            .await
            .unwrap();
        let received = tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(received, vec![1, 2, 3]);
        listener.close().await;
    }

    #[tokio::test]
    async fn drops_unknown_sources() {
        let listener = bind_local(Default::default()).await;
        let expected = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let (tx, rx) = mpsc::channel();
        listener.add_hook(
            expected.local_addr().unwrap(),
            Arc::new(move |payload| {
                tx.send(payload.to_vec()).unwrap();
            }),
        );
        listener.start();

        stranger
            .send_to(&[9, 9], listener.local_addr())
            .await
            .unwrap();
        expected
            .send_to(&[1], listener.local_addr())
            .await
            .unwrap();

        let received = tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        // the stranger's datagram never surfaced
        assert_eq!(received, vec![1]);
        listener.close().await;
    }

    #[tokio::test]
    async fn any_port_rebinds_on_first_match() {
        let listener = bind_local(UdpListenerConfig {
            any_port: true,
            ..Default::default()
        })
        .await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let actual_port = sender.local_addr().unwrap().port();
        // register the right IP under the wrong port
        let registered =
            SocketAddr::new(sender.local_addr().unwrap().ip(), actual_port.wrapping_add(1));

        let (tx, rx) = mpsc::channel();
        listener.add_hook(
            registered,
            Arc::new(move |payload| {
                tx.send(payload.to_vec()).unwrap();
            }),
        );
        listener.start();

        sender
            .send_to(&[7, 7], listener.local_addr())
            .await
            .unwrap();
        let received = tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(received, vec![7, 7]);
        listener.close().await;
    }

    #[tokio::test]
    async fn oversized_datagram_reports_decode_error() {
        let listener = bind_local(UdpListenerConfig {
            max_packet_size: 16,
            ..Default::default()
        })
        .await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let (tx, rx) = mpsc::channel();
        listener.set_decode_error_hook(Arc::new(move |err| {
            tx.send(err.to_string()).unwrap();
        }));
        listener.add_hook(sender.local_addr().unwrap(), Arc::new(|_| {}));
        listener.start();

        sender
            .send_to(&[0_u8; 64], listener.local_addr())
            .await
            .unwrap();
        let reported = tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).unwrap()
        })
        .await
        .unwrap();
        assert!(reported.contains("oversized"));
        listener.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_unblocks_reader() {
        let listener = bind_local(Default::default()).await;
        listener.start();
        listener.close().await;
        listener.close().await;
    }
}
