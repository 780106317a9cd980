//! Server-side session state: the SETUP-accumulated media set, the state
//! machine and the invariants every request is checked against.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rtp_session::receiver::RtcpReceiverContext;
use rtsp_formats::header::transport::TransportHeader;
use tokio_util::{bytes::Bytes, sync::CancellationToken};
use unified_io::write_queue::WriteQueue;
use uuid::Uuid;

use crate::{
    errors::{RtspServerError, RtspServerResult},
    handler::PacketKind,
    stream::ServerStream,
};

pub const SESSION_ID_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSessionState {
    Initial,
    PrePlay,
    Play,
    PreRecord,
    Record,
}

impl ServerSessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::PrePlay => "PrePlay",
            Self::Play => "Play",
            Self::PreRecord => "PreRecord",
            Self::Record => "Record",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFamily {
    Udp,
    Multicast,
    Tcp,
}

impl TransportFamily {
    pub fn of(transport: &TransportHeader) -> Self {
        if transport.is_tcp() {
            Self::Tcp
        } else if transport.is_multicast() {
            Self::Multicast
        } else {
            Self::Udp
        }
    }
}

/// One set-up track of a session.
pub(crate) struct SessionMedia {
    pub track_id: usize,
    pub client_rtp_addr: Option<SocketAddr>,
    pub client_rtcp_addr: Option<SocketAddr>,
    pub interleaved: Option<(u8, u8)>,
    /// Publisher sessions account incoming packets per medium.
    pub receiver_context: Option<Arc<Mutex<RtcpReceiverContext>>>,
}

impl SessionMedia {
    pub fn track_of_channel(&self, channel: u8) -> Option<PacketKind> {
        match self.interleaved {
            Some((rtp, _)) if rtp == channel => Some(PacketKind::Rtp),
            Some((_, rtcp)) if rtcp == channel => Some(PacketKind::Rtcp),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub(crate) struct MediaSnapshot {
    pub track_id: usize,
    pub client_rtp_addr: Option<SocketAddr>,
    pub client_rtcp_addr: Option<SocketAddr>,
    pub interleaved: Option<(u8, u8)>,
    pub receiver_context: Option<Arc<Mutex<RtcpReceiverContext>>>,
}

pub(crate) struct SessionInner {
    pub state: ServerSessionState,
    pub path: Option<String>,
    pub family: Option<TransportFamily>,
    pub medias: Vec<SessionMedia>,
    /// Set when the first SETUP carried mode=RECORD.
    pub is_publisher: Option<bool>,
    pub tcp_owner: Option<Uuid>,
    pub keepalive_deadline: Instant,
    pub stream: Option<Arc<ServerStream>>,
    pub multicast_acquired: bool,
    pub closed: bool,
}

pub struct ServerSession {
    id: String,
    peer_addr: SocketAddr,
    creating_conn: Uuid,
    pub(crate) inner: Mutex<SessionInner>,
    /// Reader fan-out queue, drained by the session's writer task on UDP.
    pub(crate) out_queue: Arc<WriteQueue<(usize, PacketKind, Bytes)>>,
    pub(crate) cancel: CancellationToken,
}

impl ServerSession {
    pub(crate) fn new(
        id: String,
        peer_addr: SocketAddr,
        creating_conn: Uuid,
        keepalive_timeout: Duration,
        write_buffer_count: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer_addr,
            creating_conn,
            inner: Mutex::new(SessionInner {
                state: ServerSessionState::Initial,
                path: None,
                family: None,
                medias: Vec::new(),
                is_publisher: None,
                tcp_owner: None,
                keepalive_deadline: Instant::now() + keepalive_timeout,
                stream: None,
                multicast_acquired: false,
                closed: false,
            }),
            out_queue: WriteQueue::new(write_buffer_count),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn creating_conn(&self) -> Uuid {
        self.creating_conn
    }

    pub fn state(&self) -> ServerSessionState {
        self.inner.lock().unwrap().state
    }

    pub fn path(&self) -> Option<String> {
        self.inner.lock().unwrap().path.clone()
    }

    pub fn is_publisher(&self) -> bool {
        self.inner.lock().unwrap().is_publisher.unwrap_or(false)
    }

    pub fn family(&self) -> Option<TransportFamily> {
        self.inner.lock().unwrap().family
    }

    /// Only RTSP requests refresh the keepalive deadline, never RTCP.
    pub fn refresh_keepalive(&self, timeout: Duration) {
        self.inner.lock().unwrap().keepalive_deadline = Instant::now() + timeout;
    }

    pub fn keepalive_expired(&self, now: Instant) -> bool {
        now > self.inner.lock().unwrap().keepalive_deadline
    }

    fn check_state(
        inner: &SessionInner,
        allowed: &[ServerSessionState],
    ) -> RtspServerResult<()> {
        if allowed.contains(&inner.state) {
            Ok(())
        } else {
            Err(RtspServerError::InvalidState(inner.state.name()))
        }
    }

    /// Adds one track set-up, enforcing the session invariants: one path,
    /// one transport family, no duplicate track, no SETUP after Play/Record,
    /// publisher/reader mode fixed by the first SETUP.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_media(
        &self,
        conn_id: Uuid,
        path: String,
        track_id: usize,
        family: TransportFamily,
        is_record: bool,
        client_rtp_addr: Option<SocketAddr>,
        client_rtcp_addr: Option<SocketAddr>,
        interleaved: Option<(u8, u8)>,
        receiver_context: Option<Arc<Mutex<RtcpReceiverContext>>>,
    ) -> RtspServerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_state(
            &inner,
            &[
                ServerSessionState::Initial,
                ServerSessionState::PrePlay,
                ServerSessionState::PreRecord,
            ],
        )?;

        if let Some(existing) = &inner.path
            && existing != &path
        {
            return Err(RtspServerError::SetupDifferentPaths(path));
        }
        if inner.medias.iter().any(|media| media.track_id == track_id) {
            return Err(RtspServerError::SetupTrackTwice(track_id));
        }
        if let Some(existing) = inner.family
            && existing != family
        {
            return Err(RtspServerError::SetupTransportCannotChange);
        }
        if family == TransportFamily::Tcp {
            match inner.tcp_owner {
                None => inner.tcp_owner = Some(conn_id),
                Some(owner) if owner != conn_id => {
                    return Err(RtspServerError::SessionLinkedToOtherConnection);
                }
                Some(_) => {}
            }
        }
        if let Some(was_record) = inner.is_publisher
            && was_record != is_record
        {
            return Err(RtspServerError::InvalidState(inner.state.name()));
        }

        inner.path = Some(path);
        inner.family = Some(family);
        inner.is_publisher = Some(is_record);
        inner.state = if is_record {
            ServerSessionState::PreRecord
        } else {
            ServerSessionState::PrePlay
        };
        inner.medias.push(SessionMedia {
            track_id,
            client_rtp_addr,
            client_rtcp_addr,
            interleaved,
            receiver_context,
        });
        Ok(())
    }

    pub(crate) fn check_can_play(&self) -> RtspServerResult<()> {
        Self::check_state(
            &self.inner.lock().unwrap(),
            &[ServerSessionState::PrePlay],
        )
    }

    pub(crate) fn check_can_record(&self) -> RtspServerResult<()> {
        Self::check_state(
            &self.inner.lock().unwrap(),
            &[ServerSessionState::PreRecord],
        )
    }

    pub(crate) fn check_can_pause(&self) -> RtspServerResult<()> {
        Self::check_state(
            &self.inner.lock().unwrap(),
            &[ServerSessionState::Play, ServerSessionState::Record],
        )
    }

    pub(crate) fn on_play(&self) -> RtspServerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_state(&inner, &[ServerSessionState::PrePlay])?;
        inner.state = ServerSessionState::Play;
        Ok(())
    }

    pub(crate) fn on_record(&self) -> RtspServerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_state(&inner, &[ServerSessionState::PreRecord])?;
        inner.state = ServerSessionState::Record;
        Ok(())
    }

    pub(crate) fn on_pause(&self) -> RtspServerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_state(
            &inner,
            &[ServerSessionState::Play, ServerSessionState::Record],
        )?;
        inner.state = match inner.state {
            ServerSessionState::Play => ServerSessionState::PrePlay,
            _ => ServerSessionState::PreRecord,
        };
        Ok(())
    }

    /// Binding check for requests carrying this session over TCP.
    pub(crate) fn check_conn_binding(&self, conn_id: Uuid) -> RtspServerResult<()> {
        let inner = self.inner.lock().unwrap();
        match inner.tcp_owner {
            Some(owner) if owner != conn_id => {
                Err(RtspServerError::SessionLinkedToOtherConnection)
            }
            _ => Ok(()),
        }
    }

    /// Copy of the media set for use outside the session lock.
    pub(crate) fn medias_snapshot(&self) -> Vec<MediaSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .medias
            .iter()
            .map(|media| MediaSnapshot {
                track_id: media.track_id,
                client_rtp_addr: media.client_rtp_addr,
                client_rtcp_addr: media.client_rtcp_addr,
                interleaved: media.interleaved,
                receiver_context: media.receiver_context.clone(),
            })
            .collect()
    }

    pub(crate) fn track_of_channel(&self, channel: u8) -> Option<(usize, PacketKind)> {
        let inner = self.inner.lock().unwrap();
        inner.medias.iter().find_map(|media| {
            media
                .track_of_channel(channel)
                .map(|kind| (media.track_id, kind))
        })
    }

    /// Marks the session closed; returns false when it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.state = ServerSessionState::Initial;
        true
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state().name())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn session() -> Arc<ServerSession> {
        ServerSession::new(
            "0123456789abcdef".to_owned(),
            "127.0.0.1:9999".parse().unwrap(),
            Uuid::now_v7(),
            Duration::from_secs(60),
            8,
        )
    }

    fn add_track(
        session: &ServerSession,
        conn: Uuid,
        path: &str,
        track: usize,
        family: TransportFamily,
        record: bool,
    ) -> RtspServerResult<()> {
        session.add_media(
            conn,
            path.to_owned(),
            track,
            family,
            record,
            None,
            None,
            Some(((track * 2) as u8, (track * 2 + 1) as u8)),
            None,
        )
    }

    #[test]
    fn setup_play_pause_cycle() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/stream", 0, TransportFamily::Tcp, false).unwrap();
        assert_eq!(session.state(), ServerSessionState::PrePlay);
        session.on_play().unwrap();
        assert_eq!(session.state(), ServerSessionState::Play);
        session.on_pause().unwrap();
        assert_eq!(session.state(), ServerSessionState::PrePlay);
        session.on_play().unwrap();
    }

    #[test]
    fn setup_rejected_while_playing() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/stream", 0, TransportFamily::Tcp, false).unwrap();
        session.on_play().unwrap();
        let err = add_track(&session, conn, "/stream", 1, TransportFamily::Tcp, false)
            .unwrap_err();
        assert!(matches!(err, RtspServerError::InvalidState("Play")));
    }

    #[test]
    fn play_rejected_from_initial() {
        let session = session();
        assert!(matches!(
            session.on_play().unwrap_err(),
            RtspServerError::InvalidState("Initial")
        ));
    }

    #[test]
    fn record_rejected_on_reader_session() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/stream", 0, TransportFamily::Tcp, false).unwrap();
        assert!(session.on_record().is_err());
    }

    #[test]
    fn path_cannot_change() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/a", 0, TransportFamily::Udp, false).unwrap();
        assert!(matches!(
            add_track(&session, conn, "/b", 1, TransportFamily::Udp, false).unwrap_err(),
            RtspServerError::SetupDifferentPaths(_)
        ));
    }

    #[test]
    fn track_cannot_be_set_up_twice() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/a", 0, TransportFamily::Udp, false).unwrap();
        assert!(matches!(
            add_track(&session, conn, "/a", 0, TransportFamily::Udp, false).unwrap_err(),
            RtspServerError::SetupTrackTwice(0)
        ));
    }

    #[test]
    fn transport_family_is_fixed_by_first_setup() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/a", 0, TransportFamily::Udp, false).unwrap();
        assert!(matches!(
            add_track(&session, conn, "/a", 1, TransportFamily::Tcp, false).unwrap_err(),
            RtspServerError::SetupTransportCannotChange
        ));
    }

    #[test]
    fn tcp_session_bound_to_one_connection() {
        let session = session();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        add_track(&session, first, "/a", 0, TransportFamily::Tcp, false).unwrap();
        assert!(matches!(
            add_track(&session, second, "/a", 1, TransportFamily::Tcp, false).unwrap_err(),
            RtspServerError::SessionLinkedToOtherConnection
        ));
        assert!(session.check_conn_binding(first).is_ok());
        assert!(session.check_conn_binding(second).is_err());
    }

    #[test]
    fn channel_mapping_is_injective_lookup() {
        let session = session();
        let conn = Uuid::now_v7();
        add_track(&session, conn, "/a", 0, TransportFamily::Tcp, false).unwrap();
        add_track(&session, conn, "/a", 1, TransportFamily::Tcp, false).unwrap();
        assert_eq!(session.track_of_channel(0), Some((0, PacketKind::Rtp)));
        assert_eq!(session.track_of_channel(1), Some((0, PacketKind::Rtcp)));
        assert_eq!(session.track_of_channel(2), Some((1, PacketKind::Rtp)));
        assert_eq!(session.track_of_channel(5), None);
    }

    #[test]
    fn keepalive_expiry() {
        let session = session();
        assert!(!session.keepalive_expired(Instant::now()));
        assert!(session.keepalive_expired(Instant::now() + Duration::from_secs(61)));
        session.refresh_keepalive(Duration::from_secs(120));
        assert!(!session.keepalive_expired(Instant::now() + Duration::from_secs(61)));
    }

    #[test]
    fn mark_closed_is_idempotent() {
        let session = session();
        assert!(session.mark_closed());
        assert!(!session.mark_closed());
    }
}
