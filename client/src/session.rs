//! The public session handle. The actual connection lives in the session
//! task (`core`); this type forwards commands over a channel and exposes
//! the publisher write path.

use std::sync::{Arc, Mutex};

use sdp_formats::media::MediaDescription;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::{bytes::Bytes, sync::CancellationToken};
use unified_io::write_queue::WriteQueue;
use url::Url;

use crate::{
    PacketKind,
    callbacks::ClientCallbacks,
    config::{RtspClientConfig, RtspTransport},
    core::{ClientCommand, SessionCore, connect},
    errors::{RtspClientError, RtspClientResult},
};

/// Reader-role queue depth: only receiver reports flow out.
const READER_WRITE_BUFFER_COUNT: usize = 8;

pub struct ClientSession {
    command_tx: mpsc::Sender<ClientCommand>,
    write_queue: Arc<WriteQueue<(usize, PacketKind, Bytes)>>,
    first_packet_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
    handle: Mutex<Option<tokio::task::JoinHandle<RtspClientError>>>,
    transport: RtspTransport,
}

impl ClientSession {
    /// Opens the control connection and spawns the session task.
    pub async fn dial(
        config: RtspClientConfig,
        url: Url,
        callbacks: ClientCallbacks,
    ) -> RtspClientResult<Self> {
        let transport = config.transport.unwrap_or(RtspTransport::Udp);
        let write_buffer_count = config.write_buffer_count;
        Self::dial_with(config, url, callbacks, transport, write_buffer_count).await
    }

    async fn dial_with(
        config: RtspClientConfig,
        url: Url,
        callbacks: ClientCallbacks,
        transport: RtspTransport,
        write_buffer_count: usize,
    ) -> RtspClientResult<Self> {
        let (framed, peer_addr) = connect(&config, &url).await?;
        let write_queue = WriteQueue::new(write_buffer_count.max(1));
        let (first_packet_tx, first_packet_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(8);

        let core = SessionCore::new(
            config,
            url,
            framed,
            peer_addr,
            transport,
            Arc::new(callbacks),
            write_queue.clone(),
            first_packet_tx,
            cancel.clone(),
        );
        let handle = tokio::task::spawn(core.run(command_rx));

        Ok(Self {
            command_tx,
            write_queue,
            first_packet_rx,
            cancel,
            handle: Mutex::new(Some(handle)),
            transport,
        })
    }

    /// `Options -> Describe -> Setup xN -> Play`. An unpinned transport
    /// falls back to TCP when UDP yields nothing or the SETUP is refused.
    pub async fn dial_read(
        config: RtspClientConfig,
        url: Url,
        callbacks: ClientCallbacks,
    ) -> RtspClientResult<Self> {
        let transport_pinned = config.transport.is_some();
        let transport = config.transport.unwrap_or(RtspTransport::Udp);

        match Self::dial_read_with(config.clone(), url.clone(), callbacks.clone(), transport)
            .await
        {
            Err(err) if !transport_pinned && err.triggers_tcp_downgrade() => {
                tracing::info!("udp transport failed ({}), retrying over tcp", err);
                Self::dial_read_with(config, url, callbacks, RtspTransport::Tcp).await
            }
            other => other,
        }
    }

    async fn dial_read_with(
        config: RtspClientConfig,
        url: Url,
        callbacks: ClientCallbacks,
        transport: RtspTransport,
    ) -> RtspClientResult<Self> {
        let initial_udp_read_timeout = config.initial_udp_read_timeout;
        // readers only push receiver reports through the queue
        let session =
            Self::dial_with(config, url, callbacks, transport, READER_WRITE_BUFFER_COUNT)
                .await?;

        let run = async {
            session.options().await?;
            let tracks = session.describe().await?;
            for track_id in 0..tracks.len() {
                session.setup(track_id).await?;
            }
            session.play().await?;

            // UDP must actually deliver something before the dial succeeds
            if matches!(transport, RtspTransport::Udp | RtspTransport::UdpMulticast) {
                let mut first_packet = session.first_packet_rx.clone();
                match tokio::time::timeout(
                    initial_udp_read_timeout,
                    first_packet.wait_for(|arrived| *arrived),
                )
                .await
                {
                    Err(_) => return Err(RtspClientError::NoUDPPacketsRecently),
                    Ok(Err(_)) => return Err(RtspClientError::Terminated),
                    Ok(Ok(_)) => {}
                }
            }
            Ok(())
        };

        match run.await {
            Ok(()) => Ok(session),
            Err(err) => {
                let _ = session.teardown().await;
                session.close().await;
                Err(err)
            }
        }
    }

    /// `Options -> Announce -> Setup xN -> Record` for publishers. An
    /// unpinned transport falls back to TCP when the server refuses the
    /// UDP SETUP.
    pub async fn dial_publish(
        config: RtspClientConfig,
        url: Url,
        tracks: Vec<MediaDescription>,
        callbacks: ClientCallbacks,
    ) -> RtspClientResult<Self> {
        let transport_pinned = config.transport.is_some();
        let transport = config.transport.unwrap_or(RtspTransport::Udp);
        if transport == RtspTransport::UdpMulticast {
            return Err(RtspClientError::UnsupportedTransport(
                "publishers cannot use multicast".to_owned(),
            ));
        }

        match Self::dial_publish_with(
            config.clone(),
            url.clone(),
            tracks.clone(),
            callbacks.clone(),
            transport,
        )
        .await
        {
            Err(err) if !transport_pinned && err.triggers_tcp_downgrade() => {
                tracing::info!("udp transport failed ({}), retrying over tcp", err);
                Self::dial_publish_with(config, url, tracks, callbacks, RtspTransport::Tcp)
                    .await
            }
            other => other,
        }
    }

    async fn dial_publish_with(
        config: RtspClientConfig,
        url: Url,
        tracks: Vec<MediaDescription>,
        callbacks: ClientCallbacks,
        transport: RtspTransport,
    ) -> RtspClientResult<Self> {
        let track_count = tracks.len();
        let write_buffer_count = config.write_buffer_count;
        let session =
            Self::dial_with(config, url, callbacks, transport, write_buffer_count).await?;

        let run = async {
            session.options().await?;
            session.announce(tracks).await?;
            for track_id in 0..track_count {
                session.setup(track_id).await?;
            }
            session.record().await
        };
        match run.await {
            Ok(()) => Ok(session),
            Err(err) => {
                let _ = session.teardown().await;
                session.close().await;
                Err(err)
            }
        }
    }

    async fn command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<RtspClientResult<T>>) -> ClientCommand,
    ) -> RtspClientResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RtspClientError::Terminated)?;
        reply_rx.await.map_err(|_| RtspClientError::Terminated)?
    }

    pub async fn options(&self) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Options { reply }).await
    }

    pub async fn describe(&self) -> RtspClientResult<Vec<MediaDescription>> {
        self.command(|reply| ClientCommand::Describe { reply }).await
    }

    pub async fn announce(&self, tracks: Vec<MediaDescription>) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Announce { tracks, reply })
            .await
    }

    pub async fn setup(&self, track_id: usize) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Setup { track_id, reply })
            .await
    }

    pub async fn play(&self) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Play { reply }).await
    }

    pub async fn record(&self) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Record { reply }).await
    }

    pub async fn pause(&self) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Pause { reply }).await
    }

    pub async fn teardown(&self) -> RtspClientResult<()> {
        self.command(|reply| ClientCommand::Teardown { reply }).await
    }

    pub async fn session_id(&self) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(ClientCommand::SessionId { reply: reply_tx })
            .await
            .is_err()
        {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    pub fn transport(&self) -> RtspTransport {
        self.transport
    }

    /// Publisher write path. Never blocks; a full queue surfaces as
    /// `WouldBlock` and the frame is not enqueued.
    pub fn write_frame(
        &self,
        track_id: usize,
        kind: PacketKind,
        payload: Bytes,
    ) -> RtspClientResult<()> {
        if self.write_queue.push((track_id, kind, payload)) {
            Ok(())
        } else {
            Err(RtspClientError::WouldBlock)
        }
    }

    /// Resolves when the background loop ends, with its final error.
    pub async fn wait(&self) -> RtspClientError {
        let handle = self.handle.lock().unwrap().take();
        match handle {
            Some(handle) => handle
                .await
                .unwrap_or(RtspClientError::Terminated),
            None => RtspClientError::Terminated,
        }
    }

    /// Stops the session task without a TEARDOWN exchange. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.write_queue.close();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.write_queue.close();
    }
}
