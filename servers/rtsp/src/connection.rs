//! Per-connection control task: reads requests and interleaved frames,
//! enforces the CSeq discipline, drives sessions through their state
//! machine and answers through the connection's bounded write queue.

use std::{
    collections::HashSet,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Instant,
};

use futures::{SinkExt, StreamExt};
use rtp_formats::{packet::RtpPacket, rtcp::compound_packet::RtcpCompoundPacket};
use rtp_session::receiver::RtcpReceiverContext;
use rtsp_formats::{
    RtspMessage, RtspMessageFramed,
    consts::{
        methods::{RTSP_METHODS, RtspMethod},
        status::RtspStatus,
    },
    header::{
        RtspHeader,
        auth::AuthorizationHeader,
        rtp_info::{RtpInfo, RtpInfoEntry},
        session::SessionHeader,
        transport::TransportMode,
    },
    interleaved::RtspInterleavedPacket,
    request::RtspRequest,
    response::RtspResponse,
};
use scopeguard::defer;
use sdp_formats::{media::MediaDescription, session::Sdp};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::Instrument;
use unified_io::{UnifiedIO, write_queue::WriteQueue};
use uuid::Uuid;

use crate::{
    SERVER_AGENT,
    auth::AuthValidator,
    errors::{RtspServerError, RtspServerResult},
    handler::{ConnContext, PacketKind, ServerHandler, SessionContext},
    rtsp_server_simple_response,
    server::ServerShared,
    session::{ServerSession, TransportFamily},
    stream::{MulticastSink, ReaderSink, ServerStream},
};

pub(crate) struct ConnHandle {
    pub write_queue: Arc<WriteQueue<RtspMessage>>,
    pub cancel: tokio_util::sync::CancellationToken,
}

pub(crate) struct ServerConnection<H: ServerHandler> {
    server: Arc<ServerShared<H>>,
    conn_id: Uuid,
    peer_addr: SocketAddr,
    write_queue: Arc<WriteQueue<RtspMessage>>,
    cancel: tokio_util::sync::CancellationToken,

    current_session: Option<Arc<ServerSession>>,
    announced_sdp: Option<Sdp>,
    announced_path: Option<String>,
    described_stream: Option<Arc<ServerStream>>,
    auth: Option<AuthValidator>,
    used_channels: HashSet<u8>,
}

/// Splits a SETUP path into the stream path and its trailing control
/// segment, e.g. `/cam/trackID=1` into (`/cam`, `trackID=1`).
fn split_control(path: &str) -> (String, Option<String>) {
    match path.rsplit_once('/') {
        Some((base, segment)) if segment.contains('=') => {
            let base = if base.is_empty() { "/" } else { base };
            (base.to_owned(), Some(segment.to_owned()))
        }
        _ => (path.to_owned(), None),
    }
}

fn track_of_control(tracks: &[MediaDescription], control: Option<&String>) -> Option<usize> {
    let control = control?;
    if let Some(found) = tracks.iter().position(|track| {
        track
            .control
            .as_ref()
            .is_some_and(|candidate| candidate == control || control.ends_with(candidate))
    }) {
        return Some(found);
    }
    control
        .strip_prefix("trackID=")
        .and_then(|id| id.parse().ok())
}

impl<H: ServerHandler> ServerConnection<H> {
    pub fn new(server: Arc<ServerShared<H>>, peer_addr: SocketAddr) -> Self {
        let write_queue = WriteQueue::new(server.config.write_buffer_count);
        let auth = server
            .config
            .auth
            .clone()
            .map(AuthValidator::new);
        Self {
            server,
            conn_id: Uuid::now_v7(),
            peer_addr,
            write_queue,
            cancel: tokio_util::sync::CancellationToken::new(),
            current_session: None,
            announced_sdp: None,
            announced_path: None,
            described_stream: None,
            auth,
            used_channels: HashSet::new(),
        }
    }

    fn conn_context(&self) -> ConnContext {
        ConnContext {
            conn_id: self.conn_id,
            peer_addr: self.peer_addr,
        }
    }

    fn session_context(&self, session: &ServerSession) -> SessionContext {
        SessionContext {
            conn_id: self.conn_id,
            peer_addr: self.peer_addr,
            session_id: session.id().to_owned(),
            path: session.path(),
        }
    }

    pub async fn run(mut self, io: Pin<Box<dyn UnifiedIO>>) {
        let span = tracing::debug_span!("rtsp conn", conn_id = %self.conn_id, peer = %self.peer_addr);
        async {
            let (read_half, write_half) = tokio::io::split(io);
            let mut framed_read = FramedRead::new(read_half, RtspMessageFramed);

            self.server.register_conn(
                self.conn_id,
                ConnHandle {
                    write_queue: self.write_queue.clone(),
                    cancel: self.cancel.clone(),
                },
            );
            self.spawn_writer(write_half);
            self.server.handler.on_conn_open(&self.conn_context());

            let err = self.read_loop(&mut framed_read).await;
            tracing::debug!("connection closing: {}", err);

            // the writer drains queued responses before observing the close
            self.write_queue.close();
            self.cancel.cancel();
            self.server.handler.on_conn_close(&self.conn_context(), &err);
            self.server.on_conn_closed(self.conn_id, &err).await;
        }
        .instrument(span)
        .await
    }

    fn spawn_writer(&self, write_half: tokio::io::WriteHalf<Pin<Box<dyn UnifiedIO>>>) {
        let queue = self.write_queue.clone();
        let cancel = self.cancel.clone();
        let write_timeout = self.server.config.write_timeout;
        tokio::task::spawn(async move {
            let mut framed = FramedWrite::new(write_half, RtspMessageFramed);
            while let Some(message) = queue.pull().await {
                match tokio::time::timeout(write_timeout, framed.send(message)).await {
                    Err(_) => {
                        tracing::debug!("write timed out, dropping connection");
                        break;
                    }
                    Ok(Err(err)) => {
                        tracing::debug!("write failed: {}", err);
                        break;
                    }
                    Ok(Ok(())) => {}
                }
            }
            cancel.cancel();
        });
    }

    async fn read_loop(
        &mut self,
        framed: &mut FramedRead<
            tokio::io::ReadHalf<Pin<Box<dyn UnifiedIO>>>,
            RtspMessageFramed,
        >,
    ) -> RtspServerError {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return RtspServerError::Terminated,
                message = framed.next() => message,
            };
            match message {
                None => return RtspServerError::GracefulExit,
                Some(Err(err)) => return RtspServerError::RtspMessageError(err),
                Some(Ok(RtspMessage::Request(request))) => {
                    if let Err(err) = self.handle_request(request).await {
                        return err;
                    }
                }
                Some(Ok(RtspMessage::Interleaved(frame))) => self.handle_interleaved(frame),
                Some(Ok(RtspMessage::Response(response))) => {
                    tracing::debug!("ignoring unsolicited response: {}", response.status());
                }
            }
        }
    }

    fn push_message(&self, message: RtspMessage) -> RtspServerResult<()> {
        if !self.write_queue.push(message) {
            return Err(RtspServerError::OverflowedBuffer);
        }
        Ok(())
    }

    fn send_response(
        &self,
        cseq: Option<u32>,
        session_header: Option<SessionHeader>,
        mut response: RtspResponse,
    ) -> RtspServerResult<()> {
        if let Some(cseq) = cseq
            && !response.headers().contains(RtspHeader::CSeq)
        {
            response.headers_mut().push(RtspHeader::CSeq, cseq.to_string());
        }
        if let Some(session) = session_header
            && !response.headers().contains(RtspHeader::Session)
        {
            response
                .headers_mut()
                .push(RtspHeader::Session, session.to_string());
        }
        response.headers_mut().set(RtspHeader::Server, SERVER_AGENT);
        response
            .headers_mut()
            .set(RtspHeader::Date, chrono::Utc::now().to_rfc2822());
        tracing::debug!("sending response: {}", response.status());
        self.push_message(RtspMessage::Response(response))
    }

    async fn handle_request(&mut self, request: RtspRequest) -> RtspServerResult<()> {
        let span = tracing::debug_span!(
            "handle_request",
            method = %request.method(),
            uri = %request.uri(),
            cseq = request.headers().cseq(),
        );
        async {
            let cseq = request.headers().cseq();
            let Some(cseq) = cseq else {
                // S2: answer 400, then drop the connection
                let _ = self.send_response(
                    None,
                    None,
                    rtsp_server_simple_response(RtspStatus::BadRequest),
                );
                return Err(RtspServerError::CSeqMissing);
            };

            // requests are the only thing that refreshes a session keepalive
            if let Some(header) = request.headers().session()
                && let Some(session) = self.server.find_session(&header.id)
            {
                session
                    .refresh_keepalive(self.server.config.close_session_after_no_requests_for);
            }

            if !self.check_authorized(&request)? {
                return self.send_unauthorized(cseq);
            }

            let result = self.dispatch(&request).await;
            match result {
                Ok(response) => {
                    let session_header = request
                        .headers()
                        .session()
                        .or_else(|| {
                            self.current_session.as_ref().map(|session| {
                                SessionHeader::new(session.id()).with_timeout(
                                    self.server
                                        .config
                                        .close_session_after_no_requests_for
                                        .as_secs(),
                                )
                            })
                        });
                    self.send_response(Some(cseq), session_header, response)
                }
                Err(err) => {
                    tracing::debug!("request failed: {}", err);
                    match err.status() {
                        Some(status) => {
                            let _ = self.send_response(
                                Some(cseq),
                                None,
                                rtsp_server_simple_response(status),
                            );
                            // protocol and state errors close the connection
                            // once the response has been flushed
                            Err(err)
                        }
                        None => Err(err),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn check_authorized(&self, request: &RtspRequest) -> RtspServerResult<bool> {
        let Some(validator) = &self.auth else {
            return Ok(true);
        };
        if request.method() == RtspMethod::Options {
            return Ok(true);
        }
        let Some(header) = request.headers().get_unique(RtspHeader::Authorization) else {
            return Ok(false);
        };
        let Ok(authorization) = header.parse::<AuthorizationHeader>() else {
            return Ok(false);
        };
        Ok(validator.validate(&authorization, request.method()))
    }

    fn send_unauthorized(&self, cseq: u32) -> RtspServerResult<()> {
        let validator = self.auth.as_ref().unwrap();
        let mut builder = RtspResponse::builder().status(RtspStatus::Unauthorized);
        for challenge in validator.challenges() {
            builder = builder.header(RtspHeader::WWWAuthenticate, challenge.to_string());
        }
        self.send_response(Some(cseq), None, builder.build()?)
    }

    async fn dispatch(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        match request.method() {
            RtspMethod::Options => self.handle_options(request),
            RtspMethod::Describe => self.handle_describe(request).await,
            RtspMethod::Announce => self.handle_announce(request).await,
            RtspMethod::Setup => self.handle_setup(request).await,
            RtspMethod::Play => self.handle_play(request).await,
            RtspMethod::Record => self.handle_record(request).await,
            RtspMethod::Pause => self.handle_pause(request).await,
            RtspMethod::TearDown => self.handle_teardown(request).await,
            RtspMethod::GetParameter => {
                self.server
                    .handler
                    .on_get_parameter(&self.conn_context(), request)
                    .await
            }
            RtspMethod::SetParameter => {
                self.server
                    .handler
                    .on_set_parameter(&self.conn_context(), request)
                    .await
            }
        }
    }

    fn handle_options(&mut self, _request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        Ok(RtspResponse::builder()
            .status(RtspStatus::OK)
            .header(RtspHeader::Public, RTSP_METHODS.join(", "))
            .build()?)
    }

    async fn handle_describe(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let (response, stream) = self
            .server
            .handler
            .on_describe(&self.conn_context(), request)
            .await?;
        if let Some(stream) = stream {
            let path = request.uri().path().trim_end_matches('/').to_owned();
            self.server.register_stream(&path, stream.clone());
            self.described_stream = Some(stream);
        }
        Ok(response)
    }

    async fn handle_announce(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let content_type = request.headers().get_unique(RtspHeader::ContentType);
        if content_type.map(String::as_str) != Some("application/sdp") {
            tracing::warn!("announce without application/sdp content type");
            return Ok(rtsp_server_simple_response(RtspStatus::UnsupportedMediaType));
        }
        let Some(body) = request.body() else {
            return Ok(rtsp_server_simple_response(RtspStatus::BadRequest));
        };
        let sdp: Sdp = body.parse()?;
        self.announced_sdp = Some(sdp);
        self.announced_path = Some(request.uri().path().trim_end_matches('/').to_owned());
        self.server
            .handler
            .on_announce(&self.conn_context(), request)
            .await
    }

    async fn handle_setup(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let Some(transport) = request.headers().transport() else {
            return Err(RtspServerError::InvalidTransport(
                "SETUP without a Transport header".to_owned(),
            ));
        };
        let family = TransportFamily::of(&transport);
        let is_record = transport.mode == Some(TransportMode::Record);

        // resolve the stream path and the track this SETUP binds
        let (path, control) = split_control(request.uri().path().trim_end_matches('/'));
        let (tracks, stream) = if is_record {
            let Some(sdp) = &self.announced_sdp else {
                return Err(RtspServerError::InvalidState("Initial"));
            };
            if let Some(announced) = &self.announced_path
                && announced != &path
            {
                return Err(RtspServerError::InvalidPath(path));
            }
            (sdp.media_descriptions(), None)
        } else {
            let stream = self
                .described_stream
                .clone()
                .or_else(|| self.server.find_stream(&path));
            let Some(stream) = stream else {
                return Err(RtspServerError::InvalidPath(path));
            };
            (stream.tracks().to_vec(), Some(stream))
        };
        let Some(track_id) = track_of_control(&tracks, control.as_ref()) else {
            return Err(RtspServerError::InvalidPath(request.uri().path().to_owned()));
        };
        if track_id >= tracks.len() {
            return Err(RtspServerError::InvalidPath(format!(
                "track {} out of range",
                track_id
            )));
        }

        // a connection drives at most one session into Play or Record
        if let Some(current) = &self.current_session
            && matches!(
                current.state(),
                crate::session::ServerSessionState::Play
                    | crate::session::ServerSessionState::Record
            )
        {
            return Err(RtspServerError::InvalidState(current.state().name()));
        }

        // find or create the session
        let session = match request.headers().session() {
            Some(header) => self
                .server
                .find_session(&header.id)
                .ok_or(RtspServerError::SessionNotFound(header.id))?,
            None => {
                let session = self.server.create_session(self.peer_addr, self.conn_id);
                self.server
                    .handler
                    .on_session_open(&self.session_context(&session));
                session
            }
        };

        let mut response_transport = transport.clone();
        let mut client_rtp_addr = None;
        let mut client_rtcp_addr = None;
        let mut interleaved = None;
        match family {
            TransportFamily::Tcp => {
                if let Some(current) = &self.current_session
                    && current.id() != session.id()
                    && current.family() == Some(TransportFamily::Tcp)
                {
                    return Err(RtspServerError::ConnLinkedToOtherSession);
                }
                let (rtp_channel, rtcp_channel) =
                    transport.interleaved.unwrap_or_else(|| {
                        let base = (self.used_channels.len() * 2) as u8;
                        (base, base + 1)
                    });
                if self.used_channels.contains(&rtp_channel)
                    || self.used_channels.contains(&rtcp_channel)
                {
                    return Err(RtspServerError::InvalidChannel(rtp_channel));
                }
                interleaved = Some((rtp_channel, rtcp_channel));
                response_transport.interleaved = Some((rtp_channel, rtcp_channel));
            }
            TransportFamily::Udp => {
                let Some((udp_rtp, udp_rtcp)) = self.server.udp_pair() else {
                    return Err(RtspServerError::UnsupportedTransport(
                        "server has no UDP ports configured".to_owned(),
                    ));
                };
                let Some((client_rtp_port, client_rtcp_port)) = transport.client_port else {
                    return Err(RtspServerError::InvalidTransport(
                        "UDP SETUP without client_port".to_owned(),
                    ));
                };
                client_rtp_addr =
                    Some(SocketAddr::new(self.peer_addr.ip(), client_rtp_port));
                client_rtcp_addr =
                    Some(SocketAddr::new(self.peer_addr.ip(), client_rtcp_port));
                response_transport.server_port =
                    Some((udp_rtp.local_port(), udp_rtcp.local_port()));
            }
            TransportFamily::Multicast => {
                if self.server.multicast().is_none() {
                    return Err(RtspServerError::UnsupportedTransport(
                        "server has no multicast range configured".to_owned(),
                    ));
                }
                if is_record {
                    return Err(RtspServerError::UnsupportedTransport(
                        "multicast is read-only".to_owned(),
                    ));
                }
            }
        }

        let receiver_context = is_record.then(|| {
            let clock_rate = tracks
                .get(track_id)
                .and_then(|track| track.clock_rate())
                .unwrap_or(90000);
            Arc::new(Mutex::new(RtcpReceiverContext::new(clock_rate)))
        });

        session.add_media(
            self.conn_id,
            path.clone(),
            track_id,
            family,
            is_record,
            client_rtp_addr,
            client_rtcp_addr,
            interleaved,
            receiver_context,
        )?;
        if let Some((rtp_channel, rtcp_channel)) = interleaved {
            self.used_channels.insert(rtp_channel);
            self.used_channels.insert(rtcp_channel);
        }
        if let Some(stream) = stream {
            session.inner.lock().unwrap().stream = Some(stream);
        }

        // multicast readers share one ref-counted listener pair per path
        if family == TransportFamily::Multicast {
            let already = session.inner.lock().unwrap().multicast_acquired;
            if !already {
                let handle = self
                    .server
                    .multicast()
                    .unwrap()
                    .acquire(&path)
                    .await?;
                session.inner.lock().unwrap().multicast_acquired = true;
                response_transport.destination = Some(handle.group.to_string());
                response_transport.port = Some((handle.rtp_port, handle.rtcp_port));
                response_transport.ttl = Some(unified_io::udp::MULTICAST_TTL as u8);
            } else if let Some(handle) = self.server.multicast_handle(&path) {
                response_transport.destination = Some(handle.group.to_string());
                response_transport.port = Some((handle.rtp_port, handle.rtcp_port));
                response_transport.ttl = Some(unified_io::udp::MULTICAST_TTL as u8);
            }
        }

        self.current_session = Some(session.clone());

        let handler_response = self
            .server
            .handler
            .on_setup(&self.session_context(&session), request)
            .await?;
        if handler_response.status() != RtspStatus::OK {
            return Ok(handler_response);
        }

        response_transport.mode = Some(if is_record {
            TransportMode::Record
        } else {
            TransportMode::Play
        });
        Ok(RtspResponse::builder()
            .status(RtspStatus::OK)
            .header(RtspHeader::Transport, response_transport.to_string())
            .header(
                RtspHeader::Session,
                SessionHeader::new(session.id())
                    .with_timeout(
                        self.server
                            .config
                            .close_session_after_no_requests_for
                            .as_secs(),
                    )
                    .to_string(),
            )
            .build()?)
    }

    fn session_of_request(
        &self,
        request: &RtspRequest,
    ) -> RtspServerResult<Arc<ServerSession>> {
        let Some(header) = request.headers().session() else {
            return Err(RtspServerError::SessionNotFound("".to_owned()));
        };
        let session = self
            .server
            .find_session(&header.id)
            .ok_or(RtspServerError::SessionNotFound(header.id))?;
        session.check_conn_binding(self.conn_id)?;

        // the request path must match what SETUP bound
        if let Some(bound) = session.path() {
            let requested = request.uri().path().trim_end_matches('/');
            if !requested.is_empty() && requested != "/" && !requested.starts_with(&bound) {
                return Err(RtspServerError::InvalidPath(requested.to_owned()));
            }
        }
        Ok(session)
    }

    async fn handle_play(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let session = self.session_of_request(request)?;
        session.check_can_play()?;
        let handler_response = self
            .server
            .handler
            .on_play(&self.session_context(&session), request)
            .await?;
        if handler_response.status() != RtspStatus::OK {
            return Ok(handler_response);
        }
        session.on_play()?;
        self.start_reading(&session);

        let rtp_info = RtpInfo(
            session
                .medias_snapshot()
                .iter()
                .map(|media| RtpInfoEntry {
                    url: format!(
                        "{}/trackID={}",
                        request.uri().as_str().trim_end_matches('/'),
                        media.track_id
                    ),
                    seq: None,
                    rtptime: None,
                })
                .collect(),
        );
        Ok(RtspResponse::builder()
            .status(RtspStatus::OK)
            .header(RtspHeader::RtpInfo, rtp_info.to_string())
            .build()?)
    }

    /// Wires the reader session into its stream's fan-out.
    fn start_reading(&mut self, session: &Arc<ServerSession>) {
        let stream = session.inner.lock().unwrap().stream.clone();
        let Some(stream) = stream else {
            return;
        };
        let family = session.family();
        match family {
            Some(TransportFamily::Tcp) => {
                let queue = self.write_queue.clone();
                let channels: Vec<(usize, (u8, u8))> = session
                    .medias_snapshot()
                    .iter()
                    .filter_map(|media| {
                        media.interleaved.map(|pair| (media.track_id, pair))
                    })
                    .collect();
                let conn_cancel = self.cancel.clone();
                let overflow_queue = self.write_queue.clone();
                stream.attach_reader(
                    session.id().to_owned(),
                    ReaderSink {
                        push: Box::new(move |track_id, kind, payload| {
                            let Some((_, (rtp_channel, rtcp_channel))) = channels
                                .iter()
                                .find(|(track, _)| *track == track_id)
                                .copied()
                            else {
                                return true;
                            };
                            let channel = match kind {
                                PacketKind::Rtp => rtp_channel,
                                PacketKind::Rtcp => rtcp_channel,
                            };
                            queue.push(RtspMessage::Interleaved(RtspInterleavedPacket {
                                channel_id: channel,
                                payload,
                            }))
                        }),
                        on_overflow: Box::new(move || {
                            overflow_queue.close();
                            conn_cancel.cancel();
                        }),
                    },
                );
            }
            Some(TransportFamily::Udp) => {
                let out_queue = session.out_queue.clone();
                let session_cancel = session.cancel.clone();
                stream.attach_reader(
                    session.id().to_owned(),
                    ReaderSink {
                        push: Box::new(move |track_id, kind, payload| {
                            out_queue.push((track_id, kind, payload))
                        }),
                        on_overflow: Box::new(move || {
                            session_cancel.cancel();
                        }),
                    },
                );
                self.spawn_udp_reader_writer(session);
            }
            Some(TransportFamily::Multicast) => {
                if !stream.has_multicast()
                    && let Some(path) = session.path()
                    && let Some(handle) = self.server.multicast_handle(&path)
                {
                    stream.set_multicast(MulticastSink {
                        rtp_listener: handle.rtp_listener.clone(),
                        rtcp_listener: handle.rtcp_listener.clone(),
                        rtp_group: handle.rtp_group_addr(),
                        rtcp_group: handle.rtcp_group_addr(),
                    });
                }
            }
            None => {}
        }
    }

    /// Drains the session's fan-out queue onto the shared unicast sockets.
    fn spawn_udp_reader_writer(&self, session: &Arc<ServerSession>) {
        let Some((udp_rtp, udp_rtcp)) = self.server.udp_pair() else {
            return;
        };
        let session = session.clone();
        tokio::task::spawn(async move {
            let queue = session.out_queue.clone();
            defer!(queue.close());
            loop {
                let pulled = tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    pulled = queue.pull() => pulled,
                };
                let Some((track_id, kind, payload)) = pulled else {
                    break;
                };
                let target = session.medias_snapshot().iter().find_map(|media| {
                    if media.track_id != track_id {
                        return None;
                    }
                    match kind {
                        PacketKind::Rtp => media.client_rtp_addr,
                        PacketKind::Rtcp => media.client_rtcp_addr,
                    }
                });
                let Some(target) = target else { continue };
                let listener = match kind {
                    PacketKind::Rtp => &udp_rtp,
                    PacketKind::Rtcp => &udp_rtcp,
                };
                if let Err(err) = listener.write_to(&payload, target).await {
                    tracing::debug!("udp fan-out write failed: {}", err);
                    break;
                }
            }
        });
    }

    async fn handle_record(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let session = self.session_of_request(request)?;
        session.check_can_record()?;
        let handler_response = self
            .server
            .handler
            .on_record(&self.session_context(&session), request)
            .await?;
        if handler_response.status() != RtspStatus::OK {
            return Ok(handler_response);
        }
        session.on_record()?;

        if session.family() == Some(TransportFamily::Udp) {
            self.register_publisher_udp_hooks(&session);
        }
        self.spawn_publisher_rr_ticker(&session);

        let mut builder = RtspResponse::builder().status(RtspStatus::OK);
        if let Some(range) = request.headers().range() {
            builder = builder.header(RtspHeader::Range, range.to_string());
        }
        Ok(builder.build()?)
    }

    /// Publisher over UDP: source-filtered hooks on the shared listener pair
    /// feed the per-medium accounting and the application callbacks.
    fn register_publisher_udp_hooks(&self, session: &Arc<ServerSession>) {
        let Some((udp_rtp, udp_rtcp)) = self.server.udp_pair() else {
            return;
        };
        let handler = self.server.handler.clone();
        let ctx = self.session_context(session);
        for media in session.medias_snapshot() {
            let Some(context) = media.receiver_context.clone() else {
                continue;
            };
            if let Some(rtp_addr) = media.client_rtp_addr {
                let handler = handler.clone();
                let ctx = ctx.clone();
                let context = context.clone();
                let track_id = media.track_id;
                udp_rtp.add_hook(
                    rtp_addr,
                    Arc::new(move |payload| match RtpPacket::parse(payload) {
                        Ok(packet) => {
                            let lost = context
                                .lock()
                                .unwrap()
                                .on_rtp_packet(&packet, Instant::now());
                            if lost > 0 {
                                handler.on_packet_lost(&ctx, track_id, lost);
                            }
                            handler.on_packet_rtp(&ctx, track_id, &packet);
                        }
                        Err(err) => handler.on_decode_error(
                            &ctx,
                            &RtspServerError::DecodeRtp(err.to_string()),
                        ),
                    }),
                );
            }
            if let Some(rtcp_addr) = media.client_rtcp_addr {
                let handler = handler.clone();
                let ctx = ctx.clone();
                let track_id = media.track_id;
                udp_rtcp.add_hook(
                    rtcp_addr,
                    Arc::new(move |payload| match RtcpCompoundPacket::parse(payload) {
                        Ok(compound) => {
                            for packet in compound.packets() {
                                if let Err(err) = context
                                    .lock()
                                    .unwrap()
                                    .on_rtcp_packet(packet, Instant::now())
                                {
                                    handler.on_decode_error(
                                        &ctx,
                                        &RtspServerError::DecodeRtcp(err.to_string()),
                                    );
                                    continue;
                                }
                                handler.on_packet_rtcp(&ctx, track_id, packet);
                            }
                        }
                        Err(err) => handler.on_decode_error(
                            &ctx,
                            &RtspServerError::DecodeRtcp(err.to_string()),
                        ),
                    }),
                );
            }
        }
    }

    /// Receiver reports back to the publisher on the configured cadence;
    /// pausing the session pauses emission.
    fn spawn_publisher_rr_ticker(&self, session: &Arc<ServerSession>) {
        let session = session.clone();
        let udp_pair = self.server.udp_pair();
        let queue = self.write_queue.clone();
        let period = self.server.config.receiver_report_period;
        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if session.state() != crate::session::ServerSessionState::Record {
                    continue;
                }
                for media in session.medias_snapshot() {
                    let Some(context) = media.receiver_context.clone() else {
                        continue;
                    };
                    let report = context.lock().unwrap().generate_report(Instant::now());
                    let Some(report) = report else { continue };
                    let compound = RtcpCompoundPacket::builder()
                        .packet(rtp_formats::rtcp::RtcpPacket::ReceiverReport(report))
                        .build();
                    let Ok(payload) = compound.to_bytes() else { continue };

                    match (media.interleaved, media.client_rtcp_addr, &udp_pair) {
                        (Some((_, rtcp_channel)), _, _) => {
                            queue.push(RtspMessage::Interleaved(RtspInterleavedPacket {
                                channel_id: rtcp_channel,
                                payload,
                            }));
                        }
                        (None, Some(addr), Some((_, udp_rtcp))) => {
                            if let Err(err) = udp_rtcp.write_to(&payload, addr).await {
                                tracing::debug!("rr write failed: {}", err);
                            }
                        }
                        _ => {}
                    }
                }
            }
        });
    }

    async fn handle_pause(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let session = self.session_of_request(request)?;
        session.check_can_pause()?;
        let handler_response = self
            .server
            .handler
            .on_pause(&self.session_context(&session), request)
            .await?;
        if handler_response.status() != RtspStatus::OK {
            return Ok(handler_response);
        }
        session.on_pause()?;
        Ok(rtsp_server_simple_response(RtspStatus::OK))
    }

    async fn handle_teardown(&mut self, request: &RtspRequest) -> RtspServerResult<RtspResponse> {
        let session = self.session_of_request(request)?;
        self.server
            .close_session(&session, RtspServerError::GracefulExit, false)
            .await;
        if self
            .current_session
            .as_ref()
            .is_some_and(|current| current.id() == session.id())
        {
            self.current_session = None;
        }
        Ok(rtsp_server_simple_response(RtspStatus::OK))
    }

    /// Routes a `$`-framed packet by its channel through the connection's
    /// TCP session.
    fn handle_interleaved(&mut self, frame: RtspInterleavedPacket) {
        let Some(session) = &self.current_session else {
            tracing::debug!("interleaved frame without a session, dropping");
            return;
        };
        let Some((track_id, kind)) = session.track_of_channel(frame.channel_id) else {
            tracing::debug!("unknown interleaved channel {}", frame.channel_id);
            return;
        };
        let ctx = self.session_context(session);
        let handler = &self.server.handler;
        let receiver_context = session
            .medias_snapshot()
            .iter()
            .find(|media| media.track_id == track_id)
            .and_then(|media| media.receiver_context.clone());

        match kind {
            PacketKind::Rtp => match RtpPacket::parse(&frame.payload) {
                Ok(packet) => {
                    if let Some(context) = receiver_context {
                        let lost = context
                            .lock()
                            .unwrap()
                            .on_rtp_packet(&packet, Instant::now());
                        if lost > 0 {
                            handler.on_packet_lost(&ctx, track_id, lost);
                        }
                    }
                    handler.on_packet_rtp(&ctx, track_id, &packet);
                }
                Err(err) => handler.on_decode_error(
                    &ctx,
                    &RtspServerError::DecodeRtp(err.to_string()),
                ),
            },
            PacketKind::Rtcp => match RtcpCompoundPacket::parse(&frame.payload) {
                Ok(compound) => {
                    for packet in compound.packets() {
                        if let Some(context) = &receiver_context
                            && let Err(err) =
                                context.lock().unwrap().on_rtcp_packet(packet, Instant::now())
                        {
                            handler.on_decode_error(
                                &ctx,
                                &RtspServerError::DecodeRtcp(err.to_string()),
                            );
                            continue;
                        }
                        handler.on_packet_rtcp(&ctx, track_id, packet);
                    }
                }
                Err(err) => handler.on_decode_error(
                    &ctx,
                    &RtspServerError::DecodeRtcp(err.to_string()),
                ),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_control_cases() {
        assert_eq!(
            split_control("/cam/trackID=1"),
            ("/cam".to_owned(), Some("trackID=1".to_owned()))
        );
        assert_eq!(split_control("/cam"), ("/cam".to_owned(), None));
        assert_eq!(
            split_control("/trackID=0"),
            ("/".to_owned(), Some("trackID=0".to_owned()))
        );
    }

    #[test]
    fn track_of_control_prefers_declared_controls() {
        let sdp: Sdp = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=s\r\n\
m=video 0 RTP/AVP 96\r\na=control:video\r\na=rtpmap:96 H264/90000\r\n\
m=audio 0 RTP/AVP 97\r\na=control:audio\r\na=rtpmap:97 mpeg4-generic/44100\r\n"
            .parse()
            .unwrap();
        let tracks = sdp.media_descriptions();
        assert_eq!(track_of_control(&tracks, Some(&"audio".to_owned())), Some(1));
        assert_eq!(track_of_control(&tracks, Some(&"video".to_owned())), Some(0));
        assert_eq!(
            track_of_control(&tracks, Some(&"trackID=1".to_owned())),
            Some(1),
            "numeric fallback when controls do not match"
        );
        assert_eq!(track_of_control(&tracks, None), None);
    }
}
