//! The session task. It owns the control connection for the whole session
//! lifetime and multiplexes: user commands, inbound frames and responses,
//! media writes from the bounded queue, and the keepalive / report /
//! liveness tickers.

use std::{
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Instant,
};

use futures::{SinkExt, StreamExt};
use rtp_formats::{
    header::RtpHeader,
    packet::RtpPacket,
    rtcp::{RtcpPacket, compound_packet::RtcpCompoundPacket, receiver_report::RtcpReceiverReport},
};
use rtp_session::{receiver::RtcpReceiverContext, sender::RtcpSenderContext};
use rtsp_formats::{
    RtspMessage, RtspMessageFramed,
    consts::{methods::RtspMethod, status::RtspStatus},
    header::{
        RtspHeader,
        range::RangeHeader,
        rtp_info::RtpInfo,
        transport::{TransportCast, TransportHeader, TransportMode, TransportProtocol},
    },
    interleaved::RtspInterleavedPacket,
    request::RtspRequest,
    response::RtspResponse,
};
use sdp_formats::{media::MediaDescription, session::Sdp};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::{bytes::Bytes, codec::Framed, sync::CancellationToken};
use unified_io::{UnifiedIO, tcp::TcpIO, write_queue::WriteQueue};
use url::Url;
use utils::traits::writer::WriteTo;

use crate::{
    PacketKind,
    auth::{AuthSender, bare_url},
    callbacks::ClientCallbacks,
    config::{RtspClientConfig, RtspTransport},
    errors::{RtspClientError, RtspClientResult},
    media::{ClientSessionMedia, bind_udp_pair, unix_now_ms},
};

const MAX_REDIRECTS: usize = 5;
const LIVENESS_TICK: std::time::Duration = std::time::Duration::from_secs(1);

pub(crate) type ClientFramed = Framed<Pin<Box<dyn UnifiedIO>>, RtspMessageFramed>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientState {
    Initial,
    PrePlay,
    Play,
    PreRecord,
    Record,
}

impl ClientState {
    fn name(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::PrePlay => "PrePlay",
            Self::Play => "Play",
            Self::PreRecord => "PreRecord",
            Self::Record => "Record",
        }
    }
}

type Reply<T> = oneshot::Sender<RtspClientResult<T>>;

pub(crate) enum ClientCommand {
    Options { reply: Reply<()> },
    Describe { reply: Reply<Vec<MediaDescription>> },
    Announce { tracks: Vec<MediaDescription>, reply: Reply<()> },
    Setup { track_id: usize, reply: Reply<()> },
    Play { reply: Reply<()> },
    Record { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Teardown { reply: Reply<()> },
    SessionId { reply: oneshot::Sender<Option<String>> },
}

pub(crate) async fn connect(
    config: &RtspClientConfig,
    url: &Url,
) -> RtspClientResult<(ClientFramed, SocketAddr)> {
    if url.scheme() != "rtsp" {
        // rtsps and tunneled variants enter through dial_with_io
        return Err(RtspClientError::UnsupportedTransport(format!(
            "scheme {} needs an externally wrapped stream",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or(RtspClientError::UrlError(url::ParseError::EmptyHost))?;
    let port = url.port().unwrap_or(554);

    let stream = tokio::time::timeout(
        config.dial_timeout,
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    .map_err(|_| {
        RtspClientError::IoError(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "dial timed out",
        ))
    })??;
    let peer_addr = stream.peer_addr()?;
    let io: Pin<Box<dyn UnifiedIO>> = Box::pin(TcpIO::new(stream));
    Ok((Framed::new(io, RtspMessageFramed), peer_addr))
}

pub(crate) struct SessionCore {
    pub config: RtspClientConfig,
    /// Request target, credentials stripped.
    pub url: Url,
    /// As given, userinfo included, for answering challenges.
    pub original_url: Url,
    pub framed: ClientFramed,
    pub peer_addr: SocketAddr,
    pub transport: RtspTransport,

    pub state: ClientState,
    pub medias: Vec<ClientSessionMedia>,
    pub described_tracks: Vec<MediaDescription>,
    pub content_base: Url,
    pub session_id: Option<String>,
    pub is_publisher: bool,
    pub next_cseq: u32,
    pub auth: Option<AuthSender>,
    pub server_supports_get_parameter: bool,

    pub callbacks: Arc<ClientCallbacks>,
    pub write_queue: Arc<WriteQueue<(usize, PacketKind, Bytes)>>,
    pub first_packet_tx: watch::Sender<bool>,
    pub cancel: CancellationToken,

    rtp_info: Option<RtpInfo>,
    play_started_at: Option<Instant>,
    last_frame_at: Instant,
}

impl SessionCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RtspClientConfig,
        original_url: Url,
        framed: ClientFramed,
        peer_addr: SocketAddr,
        transport: RtspTransport,
        callbacks: Arc<ClientCallbacks>,
        write_queue: Arc<WriteQueue<(usize, PacketKind, Bytes)>>,
        first_packet_tx: watch::Sender<bool>,
        cancel: CancellationToken,
    ) -> Self {
        let url = bare_url(&original_url);
        Self {
            config,
            content_base: url.clone(),
            url,
            original_url,
            framed,
            peer_addr,
            transport,
            state: ClientState::Initial,
            medias: Vec::new(),
            described_tracks: Vec::new(),
            session_id: None,
            is_publisher: false,
            next_cseq: 1,
            auth: None,
            server_supports_get_parameter: false,
            callbacks,
            write_queue,
            first_packet_tx,
            cancel,
            rtp_info: None,
            play_started_at: None,
            last_frame_at: Instant::now(),
        }
    }

    pub async fn run(mut self, mut command_rx: mpsc::Receiver<ClientCommand>) -> RtspClientError {
        let mut keepalive = tokio::time::interval(self.config.keepalive_period);
        let mut rr_ticker = tokio::time::interval(self.config.receiver_report_period);
        let mut sr_ticker = tokio::time::interval(self.config.sender_report_period);
        let mut liveness = tokio::time::interval(LIVENESS_TICK);
        for ticker in [&mut keepalive, &mut rr_ticker, &mut sr_ticker, &mut liveness] {
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        }

        let cancel = self.cancel.clone();
        let write_queue = self.write_queue.clone();
        let err = loop {
            // guards go through locals so the arms only borrow the framer
            let playing = self.state == ClientState::Play;
            let recording = self.state == ClientState::Record;
            let keepalive_armed = self.session_id.is_some() && (playing || recording);
            tokio::select! {
                _ = cancel.cancelled() => break RtspClientError::Terminated,
                command = command_rx.recv() => match command {
                    None => break RtspClientError::Terminated,
                    Some(command) => {
                        if let Some(final_err) = self.handle_command(command).await {
                            break final_err;
                        }
                    }
                },
                message = self.framed.next() => match message {
                    None => break RtspClientError::Terminated,
                    Some(Err(err)) => break err.into(),
                    Some(Ok(message)) => self.on_unsolicited_message(message).await,
                },
                item = write_queue.pull() => match item {
                    None => break RtspClientError::Terminated,
                    Some((track_id, kind, payload)) => {
                        if let Err(err) = self.write_media(track_id, kind, payload).await {
                            break err;
                        }
                    }
                },
                _ = keepalive.tick(), if keepalive_armed => {
                    if let Err(err) = self.send_keepalive().await {
                        break err;
                    }
                },
                _ = rr_ticker.tick(), if playing => {
                    self.send_receiver_reports().await;
                },
                _ = sr_ticker.tick(), if recording => {
                    self.send_sender_reports().await;
                },
                _ = liveness.tick(), if playing => {
                    if let Some(err) = self.check_liveness() {
                        break err;
                    }
                },
            }
        };

        if let Some(on_error) = &self.callbacks.on_transport_error
            && !matches!(err, RtspClientError::Terminated)
        {
            on_error(&err);
        }
        self.shutdown().await;
        err
    }

    /// Returns `Some(final error)` when the session is over and the task
    /// must exit.
    async fn handle_command(&mut self, command: ClientCommand) -> Option<RtspClientError> {
        match command {
            ClientCommand::Options { reply } => {
                let _ = reply.send(self.cmd_options().await);
                None
            }
            ClientCommand::Describe { reply } => {
                let _ = reply.send(self.cmd_describe().await);
                None
            }
            ClientCommand::Announce { tracks, reply } => {
                let _ = reply.send(self.cmd_announce(tracks).await);
                None
            }
            ClientCommand::Setup { track_id, reply } => {
                let _ = reply.send(self.cmd_setup(track_id).await);
                None
            }
            ClientCommand::Play { reply } => {
                let _ = reply.send(self.cmd_play().await);
                None
            }
            ClientCommand::Record { reply } => {
                let _ = reply.send(self.cmd_record().await);
                None
            }
            ClientCommand::Pause { reply } => {
                let _ = reply.send(self.cmd_pause().await);
                None
            }
            ClientCommand::Teardown { reply } => {
                let result = self.cmd_teardown().await;
                let _ = reply.send(result);
                Some(RtspClientError::Terminated)
            }
            ClientCommand::SessionId { reply } => {
                let _ = reply.send(self.session_id.clone());
                None
            }
        }
    }

    fn check_state(&self, allowed: &[ClientState]) -> RtspClientResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RtspClientError::InvalidState(self.state.name()))
        }
    }

    // ---- request plumbing ----

    fn build_request(
        &mut self,
        method: RtspMethod,
        url: &Url,
        headers: Vec<(RtspHeader, String)>,
        body: Option<String>,
    ) -> RtspClientResult<(RtspRequest, u32)> {
        let cseq = self.next_cseq;
        self.next_cseq += 1;
        let mut builder = RtspRequest::builder()
            .method(method)
            .uri(url.clone())
            .header(RtspHeader::CSeq, cseq.to_string())
            .header(RtspHeader::UserAgent, self.config.user_agent.clone())
            .headers(headers);
        if let Some(session_id) = &self.session_id {
            builder = builder.header(RtspHeader::Session, session_id.clone());
        }
        if let Some(auth) = &self.auth {
            builder = builder.header(
                RtspHeader::Authorization,
                auth.authorization(method, url).to_string(),
            );
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        Ok((builder.build()?, cseq))
    }

    async fn send_message(&mut self, message: RtspMessage) -> RtspClientResult<()> {
        tokio::time::timeout(self.config.write_timeout, self.framed.send(message))
            .await
            .map_err(|_| {
                RtspClientError::IoError(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                ))
            })?
            .map_err(Into::into)
    }

    /// Sends one request and reads to its response, dispatching any
    /// interleaved frames that arrive in between. On a 401 the advertised
    /// challenge is answered once and the request replayed.
    async fn do_request(
        &mut self,
        method: RtspMethod,
        url: Url,
        headers: Vec<(RtspHeader, String)>,
        body: Option<String>,
    ) -> RtspClientResult<RtspResponse> {
        let mut auth_retried = false;
        loop {
            let (request, cseq) =
                self.build_request(method, &url, headers.clone(), body.clone())?;
            tracing::debug!("sending request: {} {}", method, url);
            self.send_message(RtspMessage::Request(request)).await?;
            let response = self.read_response(cseq).await?;

            if response.status() == RtspStatus::Unauthorized && !auth_retried {
                auth_retried = true;
                let challenges: Vec<_> = response
                    .headers()
                    .get(RtspHeader::WWWAuthenticate)
                    .iter()
                    .filter_map(|value| value.parse().ok())
                    .collect();
                self.auth = Some(AuthSender::new(&challenges, &self.original_url)?);
                continue;
            }
            return Ok(response);
        }
    }

    async fn read_response(&mut self, cseq: u32) -> RtspClientResult<RtspResponse> {
        loop {
            let message =
                tokio::time::timeout(self.config.read_timeout, self.framed.next()).await;
            match message {
                Err(_) => {
                    return Err(RtspClientError::IoError(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no response within the read timeout",
                    )));
                }
                Ok(None) => return Err(RtspClientError::Terminated),
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(Some(Ok(RtspMessage::Response(response)))) => {
                    if response.headers().cseq() == Some(cseq) {
                        self.remember_session_header(&response);
                        return Ok(response);
                    }
                    tracing::debug!("skipping response with unrelated cseq");
                }
                Ok(Some(Ok(other))) => self.on_unsolicited_message(other).await,
            }
        }
    }

    fn remember_session_header(&mut self, response: &RtspResponse) {
        if let Some(header) = response.headers().session() {
            self.session_id = Some(header.id);
        }
    }

    fn expect_ok(response: RtspResponse) -> RtspClientResult<RtspResponse> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RtspClientError::WrongStatusCode {
                code: response.status().code(),
                message: response.status().description().to_owned(),
            })
        }
    }

    // ---- conversation commands ----

    async fn cmd_options(&mut self) -> RtspClientResult<()> {
        let response = self
            .do_request(RtspMethod::Options, self.url.clone(), vec![], None)
            .await?;
        let response = Self::expect_ok(response)?;
        if let Some(public) = response.headers().get_unique(RtspHeader::Public) {
            self.server_supports_get_parameter = public
                .split(',')
                .any(|method| method.trim() == "GET_PARAMETER");
        }
        Ok(())
    }

    async fn cmd_describe(&mut self) -> RtspClientResult<Vec<MediaDescription>> {
        self.check_state(&[ClientState::Initial])?;
        let mut target = self.url.clone();
        let mut redirects = 0;
        let response = loop {
            let response = self
                .do_request(
                    RtspMethod::Describe,
                    target.clone(),
                    vec![(RtspHeader::Accept, "application/sdp".to_owned())],
                    None,
                )
                .await?;
            if response.status().is_redirect() {
                if self.config.redirect_disable {
                    return Err(RtspClientError::WrongStatusCode {
                        code: response.status().code(),
                        message: response.status().description().to_owned(),
                    });
                }
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RtspClientError::TooManyRedirects);
                }
                let location = response
                    .headers()
                    .get_unique(RtspHeader::Location)
                    .ok_or(RtspClientError::TooManyRedirects)?;
                target = location.parse()?;
                tracing::debug!("following redirect to {}", target);
                // the new location may live on another server
                let (framed, peer_addr) = connect(&self.config, &target).await?;
                self.framed = framed;
                self.peer_addr = peer_addr;
                self.url = bare_url(&target);
                continue;
            }
            break Self::expect_ok(response)?;
        };

        let base = response
            .headers()
            .get_unique(RtspHeader::ContentBase)
            .and_then(|base| base.parse().ok())
            .unwrap_or_else(|| self.url.clone());
        self.content_base = base;

        let body = response.body().ok_or(RtspClientError::MissingSdp)?;
        let sdp: Sdp = body.parse()?;
        let tracks = sdp.media_descriptions();
        if tracks.is_empty() {
            return Err(RtspClientError::NoMedias);
        }
        self.described_tracks = tracks.clone();
        Ok(tracks)
    }

    async fn cmd_announce(&mut self, tracks: Vec<MediaDescription>) -> RtspClientResult<()> {
        self.check_state(&[ClientState::Initial])?;
        if tracks.is_empty() {
            return Err(RtspClientError::NoMedias);
        }
        let sdp = Sdp::from_media_descriptions(&tracks);
        let response = self
            .do_request(
                RtspMethod::Announce,
                self.url.clone(),
                vec![(RtspHeader::ContentType, "application/sdp".to_owned())],
                Some(sdp.to_string()),
            )
            .await?;
        Self::expect_ok(response)?;
        self.described_tracks = tracks;
        self.is_publisher = true;
        self.state = ClientState::PreRecord;
        Ok(())
    }

    async fn cmd_setup(&mut self, track_id: usize) -> RtspClientResult<()> {
        self.check_state(&[
            ClientState::Initial,
            ClientState::PrePlay,
            ClientState::PreRecord,
        ])?;
        let track = self
            .described_tracks
            .get(track_id)
            .cloned()
            .ok_or(RtspClientError::NoMedias)?;
        let control_url = track.control_url(&self.content_base)?;
        let mut media = ClientSessionMedia::new(track_id, track, control_url.clone());

        let mut transport_header = TransportHeader {
            mode: Some(if self.is_publisher {
                TransportMode::Record
            } else {
                TransportMode::Play
            }),
            ..Default::default()
        };
        match self.transport {
            RtspTransport::Udp => {
                let (rtp, rtcp) = bind_udp_pair(
                    self.config.max_packet_size,
                    self.config.write_timeout,
                    self.config.any_port_enable,
                    None,
                    None,
                )
                .await?;
                transport_header.protocol = Some(TransportProtocol::RtpAvpUdp);
                transport_header.cast = Some(TransportCast::Unicast);
                transport_header.client_port = Some((rtp.local_port(), rtcp.local_port()));
                media.rtp_listener = Some(Arc::new(rtp));
                media.rtcp_listener = Some(Arc::new(rtcp));
            }
            RtspTransport::UdpMulticast => {
                transport_header.protocol = Some(TransportProtocol::RtpAvpUdp);
                transport_header.cast = Some(TransportCast::Multicast);
            }
            RtspTransport::Tcp => {
                let base = (track_id * 2) as u8;
                transport_header.protocol = Some(TransportProtocol::RtpAvpTcp);
                transport_header.cast = Some(TransportCast::Unicast);
                transport_header.interleaved = Some((base, base + 1));
            }
        }

        let response = self
            .do_request(
                RtspMethod::Setup,
                control_url,
                vec![(RtspHeader::Transport, transport_header.to_string())],
                None,
            )
            .await;
        let response = match response {
            Ok(response) => Self::expect_ok(response)?,
            Err(err) => {
                media.close_listeners().await;
                return Err(err);
            }
        };

        let server_transport: TransportHeader = response
            .headers()
            .transport()
            .ok_or_else(|| RtspClientError::UnsupportedTransport(
                "SETUP response without a Transport header".to_owned(),
            ))?;
        match self.transport {
            RtspTransport::Udp => {
                let (server_rtp_port, server_rtcp_port) =
                    server_transport.server_port.ok_or_else(|| {
                        RtspClientError::UnsupportedTransport(
                            "UDP SETUP response without server_port".to_owned(),
                        )
                    })?;
                let server_ip = server_transport
                    .destination
                    .as_deref()
                    .and_then(|destination| destination.parse().ok())
                    .unwrap_or_else(|| self.peer_addr.ip());
                media.remote_rtp_addr = Some(SocketAddr::new(server_ip, server_rtp_port));
                media.remote_rtcp_addr = Some(SocketAddr::new(server_ip, server_rtcp_port));
            }
            RtspTransport::UdpMulticast => {
                let group = server_transport
                    .destination
                    .as_deref()
                    .and_then(|destination| destination.parse().ok())
                    .ok_or_else(|| {
                        RtspClientError::UnsupportedTransport(
                            "multicast SETUP response without destination".to_owned(),
                        )
                    })?;
                let (rtp_port, rtcp_port) =
                    server_transport.port.ok_or_else(|| {
                        RtspClientError::UnsupportedTransport(
                            "multicast SETUP response without port".to_owned(),
                        )
                    })?;
                let (rtp, rtcp) = bind_udp_pair(
                    self.config.max_packet_size,
                    self.config.write_timeout,
                    true,
                    Some(group),
                    Some((rtp_port, rtcp_port)),
                )
                .await?;
                media.rtp_listener = Some(Arc::new(rtp));
                media.rtcp_listener = Some(Arc::new(rtcp));
                media.remote_rtp_addr =
                    Some(SocketAddr::new(self.peer_addr.ip(), rtp_port));
                media.remote_rtcp_addr =
                    Some(SocketAddr::new(self.peer_addr.ip(), rtcp_port));
            }
            RtspTransport::Tcp => {
                media.interleaved = server_transport
                    .interleaved
                    .or(transport_header.interleaved);
            }
        }

        let clock_rate = media.media.clock_rate().unwrap_or(90000);
        if self.is_publisher {
            let mut context = RtcpSenderContext::new(clock_rate);
            if let Some(ssrc) = server_transport.ssrc_list.first() {
                context = context.with_ssrc(*ssrc);
            }
            media.sender_context = Some(Arc::new(Mutex::new(context)));
        } else {
            let mut context = RtcpReceiverContext::new(clock_rate);
            if let Some(ssrc) = server_transport.ssrc_list.first() {
                context = context.with_bound_ssrc(*ssrc);
            }
            media.receiver_context = Some(Arc::new(Mutex::new(context)));
        }

        self.medias.push(media);
        self.state = if self.is_publisher {
            ClientState::PreRecord
        } else {
            ClientState::PrePlay
        };
        Ok(())
    }

    async fn cmd_play(&mut self) -> RtspClientResult<()> {
        self.check_state(&[ClientState::PrePlay])?;
        let response = self
            .do_request(
                RtspMethod::Play,
                self.content_base.clone(),
                vec![(
                    RtspHeader::Range,
                    RangeHeader::npt_from_start().to_string(),
                )],
                None,
            )
            .await?;
        let response = Self::expect_ok(response)?;
        // initial sequence numbers and rtptimes, when the server sends them
        self.rtp_info = response
            .headers()
            .get_unique(RtspHeader::RtpInfo)
            .and_then(|value| value.parse().ok());
        if let Some(info) = &self.rtp_info {
            tracing::debug!("play rtp-info: {}", info);
        }
        self.state = ClientState::Play;
        self.play_started_at = Some(Instant::now());
        self.last_frame_at = Instant::now();
        if matches!(
            self.transport,
            RtspTransport::Udp | RtspTransport::UdpMulticast
        ) {
            self.start_udp_media(false).await;
        }
        Ok(())
    }

    async fn cmd_record(&mut self) -> RtspClientResult<()> {
        self.check_state(&[ClientState::PreRecord])?;
        let response = self
            .do_request(RtspMethod::Record, self.content_base.clone(), vec![], None)
            .await?;
        Self::expect_ok(response)?;
        self.state = ClientState::Record;
        if self.transport == RtspTransport::Udp {
            self.start_udp_media(true).await;
        }
        Ok(())
    }

    async fn cmd_pause(&mut self) -> RtspClientResult<()> {
        self.check_state(&[ClientState::Play, ClientState::Record])?;
        let response = self
            .do_request(RtspMethod::Pause, self.content_base.clone(), vec![], None)
            .await?;
        Self::expect_ok(response)?;
        self.state = match self.state {
            ClientState::Play => ClientState::PrePlay,
            _ => ClientState::PreRecord,
        };
        Ok(())
    }

    async fn cmd_teardown(&mut self) -> RtspClientResult<()> {
        let result = self
            .do_request(RtspMethod::TearDown, self.content_base.clone(), vec![], None)
            .await
            .and_then(Self::expect_ok)
            .map(|_| ());
        self.state = ClientState::Initial;
        result
    }

    // ---- media path ----

    /// Opens the NAT bindings, wires the packet hooks and starts the
    /// listener read loops.
    async fn start_udp_media(&mut self, publishing: bool) {
        for media in &self.medias {
            let (Some(rtp_listener), Some(rtcp_listener)) =
                (&media.rtp_listener, &media.rtcp_listener)
            else {
                continue;
            };

            // firewall warmup: a padding-only RTP packet and an empty RR.
            // publishers push real packets immediately, nothing to warm up
            if self.transport == RtspTransport::Udp && !publishing {
                if let Some(remote) = media.remote_rtp_addr {
                    let warmup = RtpPacket::new(
                        RtpHeader {
                            padding: true,
                            ..Default::default()
                        },
                        Bytes::from_static(&[0, 0, 0, 4]),
                    );
                    if let Ok(payload) = warmup.to_bytes() {
                        let _ = rtp_listener.write_to(&payload, remote).await;
                    }
                }
                if let Some(remote) = media.remote_rtcp_addr {
                    let empty_rr = RtcpReceiverReport::builder().build().unwrap();
                    let mut payload = Vec::new();
                    if empty_rr.write_to(&mut payload).is_ok() {
                        let _ = rtcp_listener.write_to(&payload, remote).await;
                    }
                }
            }

            let decode_error = self.callbacks.on_decode_error.clone();
            if let Some(on_decode_error) = decode_error.clone() {
                rtp_listener.set_decode_error_hook(Arc::new(move |err| {
                    on_decode_error(&RtspClientError::UnifiedIOError(err));
                }));
            }

            // RTP hook: liveness stamp, accounting, then the user callback
            if let Some(remote) = media.remote_rtp_addr
                && !publishing
            {
                let last_packet = media.last_packet_unix_ms.clone();
                let first_packet = self.first_packet_tx.clone();
                let receiver_context = media.receiver_context.clone();
                let on_packet_rtp = self.callbacks.on_packet_rtp.clone();
                let on_packet_lost = self.callbacks.on_packet_lost.clone();
                let on_decode_error = decode_error.clone();
                let track_id = media.track_id;
                rtp_listener.add_hook(
                    remote,
                    Arc::new(move |payload| {
                        last_packet.store(
                            unix_now_ms(),
                            std::sync::atomic::Ordering::Relaxed,
                        );
                        let _ = first_packet.send_replace(true);
                        match RtpPacket::parse(payload) {
                            Ok(packet) => {
                                if let Some(context) = &receiver_context {
                                    let lost = context
                                        .lock()
                                        .unwrap()
                                        .on_rtp_packet(&packet, Instant::now());
                                    if lost > 0
                                        && let Some(on_packet_lost) = &on_packet_lost
                                    {
                                        on_packet_lost(track_id, lost);
                                    }
                                }
                                if let Some(on_packet_rtp) = &on_packet_rtp {
                                    on_packet_rtp(track_id, packet);
                                }
                            }
                            Err(err) => {
                                if let Some(on_decode_error) = &on_decode_error {
                                    on_decode_error(&RtspClientError::DecodeRtp(
                                        err.to_string(),
                                    ));
                                }
                            }
                        }
                    }),
                );
            }

            // RTCP hook: SSRC binding, SR bookkeeping, user callback
            if let Some(remote) = media.remote_rtcp_addr {
                let last_packet = media.last_packet_unix_ms.clone();
                let first_packet = self.first_packet_tx.clone();
                let receiver_context = media.receiver_context.clone();
                let on_packet_rtcp = self.callbacks.on_packet_rtcp.clone();
                let on_decode_error = decode_error.clone();
                let track_id = media.track_id;
                rtcp_listener.add_hook(
                    remote,
                    Arc::new(move |payload| {
                        last_packet.store(
                            unix_now_ms(),
                            std::sync::atomic::Ordering::Relaxed,
                        );
                        let _ = first_packet.send_replace(true);
                        match RtcpCompoundPacket::parse(payload) {
                            Ok(compound) => {
                                for packet in compound.into_packets() {
                                    if let Some(context) = &receiver_context
                                        && let Err(err) = context
                                            .lock()
                                            .unwrap()
                                            .on_rtcp_packet(&packet, Instant::now())
                                        && let Some(on_decode_error) = &on_decode_error
                                    {
                                        on_decode_error(&RtspClientError::DecodeRtcp(
                                            err.to_string(),
                                        ));
                                        continue;
                                    }
                                    if let Some(on_packet_rtcp) = &on_packet_rtcp {
                                        on_packet_rtcp(track_id, packet);
                                    }
                                }
                            }
                            Err(err) => {
                                if let Some(on_decode_error) = &on_decode_error {
                                    on_decode_error(&RtspClientError::DecodeRtcp(
                                        err.to_string(),
                                    ));
                                }
                            }
                        }
                    }),
                );
            }

            rtp_listener.start();
            rtcp_listener.start();
        }

        if publishing {
            // publishers only listen for reports, not media
            self.play_started_at = None;
        }
    }

    /// An inbound message outside a request/response exchange: interleaved
    /// media, a stray response, or a server-initiated request.
    async fn on_unsolicited_message(&mut self, message: RtspMessage) {
        match message {
            RtspMessage::Interleaved(frame) => self.on_frame(frame),
            RtspMessage::Response(response) => {
                tracing::debug!(
                    "ignoring response outside an exchange: {}",
                    response.status()
                );
            }
            RtspMessage::Request(request) => {
                let status = match request.method() {
                    RtspMethod::Options => RtspStatus::OK,
                    _ => RtspStatus::NotImplemented,
                };
                let mut builder = RtspResponse::builder().status(status);
                if let Some(cseq) = request.headers().cseq() {
                    builder = builder.header(RtspHeader::CSeq, cseq.to_string());
                }
                if let Ok(response) = builder.build() {
                    let _ = self.send_message(RtspMessage::Response(response)).await;
                }
            }
        }
    }

    /// TCP-play delivery: route by channel, account, hand to the callback.
    fn on_frame(&mut self, frame: RtspInterleavedPacket) {
        self.last_frame_at = Instant::now();
        let Some((index, kind)) = self.medias.iter().enumerate().find_map(|(index, media)| {
            match media.interleaved {
                Some((rtp, _)) if rtp == frame.channel_id => Some((index, PacketKind::Rtp)),
                Some((_, rtcp)) if rtcp == frame.channel_id => {
                    Some((index, PacketKind::Rtcp))
                }
                _ => None,
            }
        }) else {
            tracing::debug!("frame on unknown channel {}", frame.channel_id);
            return;
        };
        let media = &self.medias[index];
        let track_id = media.track_id;
        media.touch();

        match kind {
            PacketKind::Rtp => match RtpPacket::parse(&frame.payload) {
                Ok(packet) => {
                    if let Some(context) = &media.receiver_context {
                        let lost = context
                            .lock()
                            .unwrap()
                            .on_rtp_packet(&packet, Instant::now());
                        if lost > 0
                            && let Some(on_packet_lost) = &self.callbacks.on_packet_lost
                        {
                            on_packet_lost(track_id, lost);
                        }
                    }
                    if let Some(on_packet_rtp) = &self.callbacks.on_packet_rtp {
                        on_packet_rtp(track_id, packet);
                    }
                }
                Err(err) => {
                    if let Some(on_decode_error) = &self.callbacks.on_decode_error {
                        on_decode_error(&RtspClientError::DecodeRtp(err.to_string()));
                    }
                }
            },
            PacketKind::Rtcp => match RtcpCompoundPacket::parse(&frame.payload) {
                Ok(compound) => {
                    for packet in compound.into_packets() {
                        if let Some(context) = &media.receiver_context
                            && let Err(err) = context
                                .lock()
                                .unwrap()
                                .on_rtcp_packet(&packet, Instant::now())
                            && let Some(on_decode_error) = &self.callbacks.on_decode_error
                        {
                            on_decode_error(&RtspClientError::DecodeRtcp(err.to_string()));
                            continue;
                        }
                        if let Some(on_packet_rtcp) = &self.callbacks.on_packet_rtcp {
                            on_packet_rtcp(track_id, packet);
                        }
                    }
                }
                Err(err) => {
                    if let Some(on_decode_error) = &self.callbacks.on_decode_error {
                        on_decode_error(&RtspClientError::DecodeRtcp(err.to_string()));
                    }
                }
            },
        }
    }

    /// Publisher writes drained from the bounded queue, in push order.
    async fn write_media(
        &mut self,
        track_id: usize,
        kind: PacketKind,
        payload: Bytes,
    ) -> RtspClientResult<()> {
        // copy what the write needs out of the media entry, the TCP path
        // below borrows the framer mutably
        let Some((interleaved, listener, remote, sender_context)) = self
            .medias
            .iter()
            .find(|media| media.track_id == track_id)
            .map(|media| {
                let (listener, remote) = match kind {
                    PacketKind::Rtp => (media.rtp_listener.clone(), media.remote_rtp_addr),
                    PacketKind::Rtcp => {
                        (media.rtcp_listener.clone(), media.remote_rtcp_addr)
                    }
                };
                (
                    media.interleaved,
                    listener,
                    remote,
                    media.sender_context.clone(),
                )
            })
        else {
            return Ok(());
        };

        if kind == PacketKind::Rtp
            && let Some(context) = &sender_context
            && let Ok(packet) = RtpPacket::parse(&payload)
        {
            context
                .lock()
                .unwrap()
                .on_rtp_packet(&packet, std::time::SystemTime::now());
        }

        match self.transport {
            RtspTransport::Tcp => {
                let Some((rtp_channel, rtcp_channel)) = interleaved else {
                    return Ok(());
                };
                let channel = match kind {
                    PacketKind::Rtp => rtp_channel,
                    PacketKind::Rtcp => rtcp_channel,
                };
                self.send_message(RtspMessage::Interleaved(RtspInterleavedPacket {
                    channel_id: channel,
                    payload,
                }))
                .await
            }
            _ => {
                if let (Some(listener), Some(remote)) = (listener, remote) {
                    listener.write_to(&payload, remote).await?;
                }
                Ok(())
            }
        }
    }

    // ---- tickers ----

    /// OPTIONS or GET_PARAMETER with no response read; late responses fall
    /// into the unsolicited path and are discarded.
    async fn send_keepalive(&mut self) -> RtspClientResult<()> {
        let method = if self.server_supports_get_parameter {
            RtspMethod::GetParameter
        } else {
            RtspMethod::Options
        };
        let (request, _) = self.build_request(method, &self.url.clone(), vec![], None)?;
        tracing::trace!("keepalive: {}", method);
        self.send_message(RtspMessage::Request(request)).await
    }

    async fn send_receiver_reports(&mut self) {
        for index in 0..self.medias.len() {
            let report = {
                let media = &self.medias[index];
                let Some(context) = &media.receiver_context else { continue };
                context.lock().unwrap().generate_report(Instant::now())
            };
            let Some(report) = report else { continue };
            let compound = RtcpCompoundPacket::builder()
                .packet(RtcpPacket::ReceiverReport(report))
                .build();
            let Ok(payload) = compound.to_bytes() else { continue };
            let track_id = self.medias[index].track_id;
            if let Err(err) = self
                .write_media(track_id, PacketKind::Rtcp, payload)
                .await
            {
                tracing::debug!("receiver report write failed: {}", err);
            }
        }
    }

    async fn send_sender_reports(&mut self) {
        for index in 0..self.medias.len() {
            let report = {
                let media = &self.medias[index];
                let Some(context) = &media.sender_context else { continue };
                context
                    .lock()
                    .unwrap()
                    .generate_report(std::time::SystemTime::now())
            };
            let Some(report) = report else { continue };
            let compound = RtcpCompoundPacket::builder()
                .packet(RtcpPacket::SenderReport(report))
                .build();
            let Ok(payload) = compound.to_bytes() else { continue };
            let track_id = self.medias[index].track_id;
            if let Err(err) = self
                .write_media(track_id, PacketKind::Rtcp, payload)
                .await
            {
                tracing::debug!("sender report write failed: {}", err);
            }
        }
    }

    /// UDP: nothing ever received within the initial window, or silence
    /// longer than the read timeout. TCP: no frame within the read timeout.
    fn check_liveness(&mut self) -> Option<RtspClientError> {
        match self.transport {
            RtspTransport::Udp | RtspTransport::UdpMulticast => {
                let started = self.play_started_at?;
                let newest = self
                    .medias
                    .iter()
                    .map(|media| media.last_packet_ms())
                    .max()
                    .unwrap_or(0);
                if newest == 0 {
                    if started.elapsed() > self.config.initial_udp_read_timeout {
                        return Some(RtspClientError::NoUDPPacketsRecently);
                    }
                    return None;
                }
                let oldest_alive = self
                    .medias
                    .iter()
                    .map(|media| media.last_packet_ms())
                    .min()
                    .unwrap_or(0);
                let silence_ms = unix_now_ms().saturating_sub(oldest_alive);
                if silence_ms > self.config.read_timeout.as_millis() as i64 {
                    return Some(RtspClientError::UDPTimeout);
                }
                None
            }
            RtspTransport::Tcp => {
                if self.last_frame_at.elapsed() > self.config.read_timeout {
                    return Some(RtspClientError::TCPTimeout);
                }
                None
            }
        }
    }

    /// Ordered teardown: queue first, then listeners, then the socket.
    async fn shutdown(&mut self) {
        self.write_queue.close();
        for media in &mut self.medias {
            media.close_listeners().await;
        }
        let _ = self.framed.close().await;
        self.state = ClientState::Initial;
    }
}
