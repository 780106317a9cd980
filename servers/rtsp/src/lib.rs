use rtsp_formats::{consts::status::RtspStatus, response::RtspResponse};

pub mod auth;
pub mod config;
pub mod connection;
pub mod errors;
pub mod handler;
pub mod multicast;
pub mod server;
pub mod session;
pub mod stream;

pub const SERVER_AGENT: &str = "yars/rtsp-server";

#[inline(always)]
pub fn rtsp_server_simple_response(status: RtspStatus) -> RtspResponse {
    RtspResponse::builder().status(status).build().unwrap()
}
