//! The acceptor and the registries: connections, sessions, streams, shared
//! UDP sockets and multicast pairs. Teardown order lives here.

use std::{
    collections::HashMap,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use unified_io::{
    UnifiedIO,
    tcp::TcpIO,
    udp::{UdpListener, UdpListenerConfig},
};
use utils::random::random_hex_string;
use uuid::Uuid;

use crate::{
    config::RtspServerConfig,
    connection::{ConnHandle, ServerConnection},
    errors::{RtspServerError, RtspServerResult},
    handler::{ServerHandler, SessionContext},
    multicast::{MulticastHandle, MulticastRegistry, validate_udp_ports},
    session::{SESSION_ID_LENGTH, ServerSession, TransportFamily},
    stream::ServerStream,
};

pub(crate) struct ServerShared<H: ServerHandler> {
    pub config: RtspServerConfig,
    pub handler: Arc<H>,
    conns: RwLock<HashMap<Uuid, ConnHandle>>,
    sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
    streams: RwLock<HashMap<String, Arc<ServerStream>>>,
    udp_rtp: Option<Arc<UdpListener>>,
    udp_rtcp: Option<Arc<UdpListener>>,
    multicast: Option<MulticastRegistry>,
    cancel: CancellationToken,
}

impl<H: ServerHandler> ServerShared<H> {
    pub fn register_conn(&self, conn_id: Uuid, handle: ConnHandle) {
        self.conns.write().unwrap().insert(conn_id, handle);
    }

    pub fn find_session(&self, id: &str) -> Option<Arc<ServerSession>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    pub fn create_session(&self, peer_addr: SocketAddr, conn_id: Uuid) -> Arc<ServerSession> {
        let mut sessions = self.sessions.write().unwrap();
        // ids are random; collisions are possible, just not twice in a row
        let id = loop {
            let candidate = random_hex_string(SESSION_ID_LENGTH);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = ServerSession::new(
            id.clone(),
            peer_addr,
            conn_id,
            self.config.close_session_after_no_requests_for,
            self.config.write_buffer_count,
        );
        sessions.insert(id, session.clone());
        tracing::info!("session {} created", session.id());
        session
    }

    pub fn register_stream(&self, path: &str, stream: Arc<ServerStream>) {
        self.streams
            .write()
            .unwrap()
            .entry(path.to_owned())
            .or_insert(stream);
    }

    pub fn find_stream(&self, path: &str) -> Option<Arc<ServerStream>> {
        self.streams.read().unwrap().get(path).cloned()
    }

    pub fn remove_stream(&self, path: &str) -> Option<Arc<ServerStream>> {
        self.streams.write().unwrap().remove(path)
    }

    pub fn udp_pair(&self) -> Option<(Arc<UdpListener>, Arc<UdpListener>)> {
        match (&self.udp_rtp, &self.udp_rtcp) {
            (Some(rtp), Some(rtcp)) => Some((rtp.clone(), rtcp.clone())),
            _ => None,
        }
    }

    pub fn multicast(&self) -> Option<&MulticastRegistry> {
        self.multicast.as_ref()
    }

    /// A handle already acquired by some session's SETUP; does not touch
    /// the refcount.
    pub fn multicast_handle(&self, path: &str) -> Option<MulticastHandle> {
        self.multicast.as_ref().and_then(|registry| registry.peek(path))
    }

    /// Tears one session down: media hooks, stream attachment, multicast
    /// references, registry entry, and the owning TCP connection when asked.
    pub async fn close_session(
        &self,
        session: &Arc<ServerSession>,
        err: RtspServerError,
        close_tcp_conn: bool,
    ) {
        if !session.mark_closed() {
            return;
        }
        tracing::info!("session {} closing: {}", session.id(), err);
        session.cancel.cancel();
        session.out_queue.close();

        // stop packet delivery before tearing down transports
        let (path, family, stream) = {
            let inner = session.inner.lock().unwrap();
            (inner.path.clone(), inner.family, inner.stream.clone())
        };
        if let Some(stream) = &stream {
            stream.detach_reader(session.id());
        }

        if let Some((udp_rtp, udp_rtcp)) = self.udp_pair() {
            for media in session.medias_snapshot() {
                if let Some(addr) = media.client_rtp_addr {
                    udp_rtp.remove_hook(addr);
                }
                if let Some(addr) = media.client_rtcp_addr {
                    udp_rtcp.remove_hook(addr);
                }
            }
        }

        let multicast_acquired = session.inner.lock().unwrap().multicast_acquired;
        if multicast_acquired
            && let (Some(registry), Some(path)) = (self.multicast.as_ref(), &path)
        {
            if let Some(stream) = &stream
                && registry.refcount(path) == 1
            {
                stream.take_multicast();
            }
            registry.release(path).await;
        }

        self.sessions.write().unwrap().remove(session.id());

        let ctx = SessionContext {
            conn_id: session.creating_conn(),
            peer_addr: session.peer_addr(),
            session_id: session.id().to_owned(),
            path,
        };
        self.handler.on_session_close(&ctx, &err);

        if close_tcp_conn && family == Some(TransportFamily::Tcp) {
            let owner = session.inner.lock().unwrap().tcp_owner;
            if let Some(owner) = owner {
                let handle = self.conns.read().unwrap().get(&owner).map(|handle| {
                    (handle.write_queue.clone(), handle.cancel.clone())
                });
                if let Some((queue, cancel)) = handle {
                    queue.close();
                    cancel.cancel();
                }
            }
        }
    }

    /// Runs when a connection's control task exits: TCP-owned sessions die
    /// with their connection.
    pub async fn on_conn_closed(&self, conn_id: Uuid, err: &RtspServerError) {
        let owned: Vec<Arc<ServerSession>> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .values()
                .filter(|session| {
                    session.inner.lock().unwrap().tcp_owner == Some(conn_id)
                })
                .cloned()
                .collect()
        };
        for session in owned {
            self.close_session(
                &session,
                RtspServerError::IoError(std::io::Error::other(err.to_string())),
                false,
            )
            .await;
        }
        self.conns.write().unwrap().remove(&conn_id);
    }

    async fn reap_expired_sessions(&self) {
        let now = Instant::now();
        let expired: Vec<Arc<ServerSession>> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .values()
                .filter(|session| session.keepalive_expired(now))
                .cloned()
                .collect()
        };
        for session in expired {
            tracing::info!("session {} timed out", session.id());
            self.close_session(&session, RtspServerError::SessionTimedOut, true)
                .await;
        }
    }
}

pub struct RtspServer<H: ServerHandler> {
    shared: Arc<ServerShared<H>>,
    listener: std::sync::Mutex<Option<tokio::net::TcpListener>>,
    local_addr: SocketAddr,
}

impl<H: ServerHandler> RtspServer<H> {
    /// Validates the configuration, binds the acceptor and the shared UDP
    /// pair; fails fast with `InvalidUDPPorts` on a bad pair.
    pub async fn new(config: RtspServerConfig, handler: H) -> RtspServerResult<Self> {
        let udp_addrs = validate_udp_ports(config.udp_rtp_address, config.udp_rtcp_address)?;
        let (udp_rtp, udp_rtcp) = match udp_addrs {
            None => (None, None),
            Some((rtp_addr, rtcp_addr)) => {
                let listener_config = UdpListenerConfig {
                    multicast_group: None,
                    max_packet_size: config.max_packet_size,
                    write_timeout: config.write_timeout,
                    any_port: false,
                };
                let rtp = UdpListener::bind(rtp_addr, listener_config.clone()).await?;
                let rtcp = UdpListener::bind(rtcp_addr, listener_config).await?;
                rtp.start();
                rtcp.start();
                (Some(Arc::new(rtp)), Some(Arc::new(rtcp)))
            }
        };
        let multicast = config.multicast_ip_range.map(|base| {
            MulticastRegistry::new(
                base,
                config.multicast_rtp_port,
                config.max_packet_size,
                config.write_timeout,
            )
        });

        let listener = tokio::net::TcpListener::bind(config.rtsp_address).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                handler: Arc::new(handler),
                conns: RwLock::new(HashMap::new()),
                sessions: RwLock::new(HashMap::new()),
                streams: RwLock::new(HashMap::new()),
                udp_rtp,
                udp_rtcp,
                multicast,
                cancel: CancellationToken::new(),
            }),
            listener: std::sync::Mutex::new(Some(listener)),
            local_addr,
        })
    }

    pub fn local_rtsp_address(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers an application-created stream so reader SETUPs can find it
    /// by path.
    pub fn publish_stream(&self, path: &str, stream: Arc<ServerStream>) {
        self.shared.register_stream(path, stream);
    }

    pub fn unpublish_stream(&self, path: &str) {
        if let Some(stream) = self.shared.remove_stream(path) {
            stream.close();
        }
    }

    pub fn stream(&self, path: &str) -> Option<Arc<ServerStream>> {
        self.shared.find_stream(path)
    }

    /// Feeds one pre-wrapped byte stream (TLS, HTTP tunnel) into the
    /// ordinary connection machinery.
    pub fn handle_io(&self, io: Pin<Box<dyn UnifiedIO>>, peer_addr: SocketAddr) {
        let conn = ServerConnection::new(self.shared.clone(), peer_addr);
        tokio::task::spawn(conn.run(io));
    }

    /// Accept loop; runs until `close` is called.
    pub async fn run(&self) -> RtspServerResult<()> {
        tracing::info!(
            "rtsp server is starting on {} with config: {:?}",
            self.local_addr,
            self.shared.config
        );
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or(RtspServerError::Terminated)?;
        self.spawn_session_reaper();

        loop {
            let accepted = tokio::select! {
                _ = self.shared.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (tcp_stream, peer_addr) = accepted?;
            tracing::info!("got new rtsp connection, peer addr: {}", peer_addr);
            self.handle_io(Box::pin(TcpIO::new(tcp_stream)), peer_addr);
        }
    }

    fn spawn_session_reaper(&self) {
        let shared = self.shared.clone();
        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                shared.reap_expired_sessions().await;
            }
        });
    }

    /// Stops the acceptor, terminates every session and connection.
    /// Idempotent.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let sessions: Vec<Arc<ServerSession>> = {
            self.shared.sessions.read().unwrap().values().cloned().collect()
        };
        for session in sessions {
            self.shared
                .close_session(&session, RtspServerError::Terminated, true)
                .await;
        }
        let conns: Vec<(Arc<unified_io::write_queue::WriteQueue<rtsp_formats::RtspMessage>>, CancellationToken)> = {
            let conns = self.shared.conns.read().unwrap();
            conns
                .values()
                .map(|handle| (handle.write_queue.clone(), handle.cancel.clone()))
                .collect()
        };
        for (queue, cancel) in conns {
            queue.close();
            cancel.cancel();
        }
        if let Some((rtp, rtcp)) = self.shared.udp_pair() {
            rtp.close().await;
            rtcp.close().await;
        }
    }
}
