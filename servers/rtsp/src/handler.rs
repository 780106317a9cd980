//! The callback surface through which applications drive the server.

use std::{net::SocketAddr, sync::Arc};

use rtp_formats::{packet::RtpPacket, rtcp::RtcpPacket};
use rtsp_formats::{
    consts::status::RtspStatus, request::RtspRequest, response::RtspResponse,
};
use uuid::Uuid;

use crate::{
    errors::{RtspServerError, RtspServerResult},
    rtsp_server_simple_response,
    stream::ServerStream,
};

#[derive(Debug, Clone)]
pub struct ConnContext {
    pub conn_id: Uuid,
    pub peer_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub conn_id: Uuid,
    pub peer_addr: SocketAddr,
    pub session_id: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// Server application callbacks. Request callbacks return the response to
/// send; the connection layer stamps CSeq and Session headers. Packet and
/// lifecycle callbacks run on the network tasks and must not block.
pub trait ServerHandler: Send + Sync + 'static {
    fn on_conn_open(&self, _ctx: &ConnContext) {}
    fn on_conn_close(&self, _ctx: &ConnContext, _err: &RtspServerError) {}
    fn on_session_open(&self, _ctx: &SessionContext) {}
    fn on_session_close(&self, _ctx: &SessionContext, _err: &RtspServerError) {}

    /// Returns the DESCRIBE response and, when the path is being published,
    /// the stream readers will attach to.
    fn on_describe(
        &self,
        _ctx: &ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<(RtspResponse, Option<Arc<ServerStream>>)>> + Send
    {
        async { Ok((rtsp_server_simple_response(RtspStatus::NotFound), None)) }
    }

    fn on_announce(
        &self,
        _ctx: &ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_setup(
        &self,
        _ctx: &SessionContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_play(
        &self,
        _ctx: &SessionContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_record(
        &self,
        _ctx: &SessionContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_pause(
        &self,
        _ctx: &SessionContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_get_parameter(
        &self,
        _ctx: &ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async {
            Ok(RtspResponse::builder()
                .status(RtspStatus::OK)
                .header(rtsp_formats::header::RtspHeader::ContentType, "text/parameters")
                .body(String::new())
                .build()?)
        }
    }

    fn on_set_parameter(
        &self,
        _ctx: &ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<RtspResponse>> + Send {
        async { Ok(rtsp_server_simple_response(RtspStatus::OK)) }
    }

    fn on_packet_rtp(&self, _ctx: &SessionContext, _track_id: usize, _packet: &RtpPacket) {}
    fn on_packet_rtcp(&self, _ctx: &SessionContext, _track_id: usize, _packet: &RtcpPacket) {}
    fn on_decode_error(&self, _ctx: &SessionContext, _err: &RtspServerError) {}
    fn on_packet_lost(&self, _ctx: &SessionContext, _track_id: usize, _count: u64) {}
}
