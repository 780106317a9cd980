//! Publisher-to-readers fan-out. Each attached reader gets packets through
//! its own bounded queue; a reader that cannot keep up is dropped alone with
//! `OverflowedBuffer`, the others are unaffected.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, RwLock, Weak},
    time::{Duration, SystemTime},
};

use rtp_formats::{
    packet::RtpPacket,
    rtcp::{RtcpPacket, compound_packet::RtcpCompoundPacket},
};
use rtp_session::sender::RtcpSenderContext;
use sdp_formats::{media::MediaDescription, session::Sdp};
use tokio_util::{bytes::Bytes, sync::CancellationToken};
use unified_io::udp::UdpListener;
use utils::traits::writer::WriteTo;

use crate::{errors::RtspServerResult, handler::PacketKind};

/// Accepts one serialized packet for one reader; false means the reader's
/// queue is full.
pub(crate) type SinkPush =
    Box<dyn Fn(usize, PacketKind, Bytes) -> bool + Send + Sync>;
/// Fires when the reader overflows, terminating its session.
pub(crate) type OverflowHook = Box<dyn Fn() + Send + Sync>;

pub(crate) struct ReaderSink {
    pub push: SinkPush,
    pub on_overflow: OverflowHook,
}

pub(crate) struct MulticastSink {
    pub rtp_listener: Arc<UdpListener>,
    pub rtcp_listener: Arc<UdpListener>,
    pub rtp_group: SocketAddr,
    pub rtcp_group: SocketAddr,
}

#[derive(Default)]
struct StreamInner {
    readers: HashMap<String, ReaderSink>,
    multicast: Option<MulticastSink>,
}

pub struct ServerStream {
    tracks: Vec<MediaDescription>,
    sender_contexts: Vec<Mutex<RtcpSenderContext>>,
    inner: RwLock<StreamInner>,
    cancel: CancellationToken,
}

impl ServerStream {
    pub fn new(tracks: Vec<MediaDescription>, sender_report_period: Duration) -> Arc<Self> {
        let sender_contexts = tracks
            .iter()
            .map(|track| Mutex::new(RtcpSenderContext::new(track.clock_rate().unwrap_or(90000))))
            .collect();
        let stream = Arc::new(Self {
            tracks,
            sender_contexts,
            inner: RwLock::new(StreamInner::default()),
            cancel: CancellationToken::new(),
        });
        Self::start_sr_ticker(Arc::downgrade(&stream), sender_report_period);
        stream
    }

    pub fn tracks(&self) -> &[MediaDescription] {
        &self.tracks
    }

    /// DESCRIBE body for this stream.
    pub fn sdp(&self) -> Sdp {
        Sdp::from_media_descriptions(&self.tracks)
    }

    pub fn reader_count(&self) -> usize {
        self.inner.read().unwrap().readers.len()
    }

    pub(crate) fn attach_reader(&self, session_id: String, sink: ReaderSink) {
        self.inner.write().unwrap().readers.insert(session_id, sink);
    }

    pub(crate) fn detach_reader(&self, session_id: &str) {
        self.inner.write().unwrap().readers.remove(session_id);
    }

    pub(crate) fn set_multicast(&self, sink: MulticastSink) {
        self.inner.write().unwrap().multicast = Some(sink);
    }

    pub(crate) fn take_multicast(&self) -> Option<MulticastSink> {
        self.inner.write().unwrap().multicast.take()
    }

    pub(crate) fn has_multicast(&self) -> bool {
        self.inner.read().unwrap().multicast.is_some()
    }

    /// Stamps the stream's per-track SSRC, updates the sender accounting and
    /// fans the packet out.
    pub async fn write_packet_rtp(
        &self,
        track_id: usize,
        packet: &mut RtpPacket,
    ) -> RtspServerResult<()> {
        if let Some(context) = self.sender_contexts.get(track_id) {
            let mut context = context.lock().unwrap();
            context.stamp(packet);
            context.on_rtp_packet(packet, SystemTime::now());
        }
        let payload = packet.to_bytes().map_err(|err| {
            crate::errors::RtspServerError::IoError(std::io::Error::other(err.to_string()))
        })?;
        self.fan_out(track_id, PacketKind::Rtp, payload).await;
        Ok(())
    }

    pub async fn write_packet_rtcp(
        &self,
        track_id: usize,
        packet: &RtcpPacket,
    ) -> RtspServerResult<()> {
        let mut buffer = Vec::new();
        packet.write_to(&mut buffer).map_err(|err| {
            crate::errors::RtspServerError::IoError(std::io::Error::other(err.to_string()))
        })?;
        self.fan_out(track_id, PacketKind::Rtcp, Bytes::from(buffer))
            .await;
        Ok(())
    }

    async fn fan_out(&self, track_id: usize, kind: PacketKind, payload: Bytes) {
        let overflowed: Vec<String> = {
            let inner = self.inner.read().unwrap();
            inner
                .readers
                .iter()
                .filter(|(_, sink)| !(sink.push)(track_id, kind, payload.clone()))
                .map(|(session_id, _)| session_id.clone())
                .collect()
        };
        for session_id in overflowed {
            tracing::warn!(
                "reader session {} overflowed its write queue, dropping it",
                session_id
            );
            let sink = self.inner.write().unwrap().readers.remove(&session_id);
            if let Some(sink) = sink {
                (sink.on_overflow)();
            }
        }

        let (rtp_listener, target) = {
            let inner = self.inner.read().unwrap();
            match (&inner.multicast, kind) {
                (Some(sink), PacketKind::Rtp) => {
                    (Some(sink.rtp_listener.clone()), Some(sink.rtp_group))
                }
                (Some(sink), PacketKind::Rtcp) => {
                    (Some(sink.rtcp_listener.clone()), Some(sink.rtcp_group))
                }
                (None, _) => (None, None),
            }
        };
        if let (Some(listener), Some(target)) = (rtp_listener, target)
            && let Err(err) = listener.write_to(&payload, target).await
        {
            tracing::warn!("multicast write failed: {}", err);
        }
    }

    fn start_sr_ticker(stream: Weak<Self>, period: Duration) {
        tokio::task::spawn(async move {
            let Some(cancel) = stream.upgrade().map(|s| s.cancel.clone()) else {
                return;
            };
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(stream) = stream.upgrade() else { break };
                for track_id in 0..stream.tracks.len() {
                    let report = stream.sender_contexts[track_id]
                        .lock()
                        .unwrap()
                        .generate_report(SystemTime::now());
                    if let Some(report) = report {
                        let compound = RtcpCompoundPacket::builder()
                            .packet(RtcpPacket::SenderReport(report))
                            .build();
                        if let Ok(payload) = compound.to_bytes() {
                            stream.fan_out(track_id, PacketKind::Rtcp, payload).await;
                        }
                    }
                }
            }
        });
    }

    /// Detaches every reader and stops the report ticker. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        let mut inner = self.inner.write().unwrap();
        inner.readers.clear();
        inner.multicast = None;
    }
}

impl Drop for ServerStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
