//! Wire-level tests driving the server with a raw framed TCP client.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use rtsp_formats::{
    RtspMessage, RtspMessageFramed,
    consts::{methods::RtspMethod, status::RtspStatus},
    header::{RtspHeader, auth::AuthAlgorithm},
    request::RtspRequest,
    response::RtspResponse,
};
use rtsp_server::{
    auth::digest_response,
    config::{AuthMethod, RtspServerConfig, ServerAuthConfig},
    handler::ServerHandler,
    server::RtspServer,
    stream::ServerStream,
};
use tokio_util::codec::Framed;
use url::Url;

struct TestHandler {
    stream: Option<Arc<ServerStream>>,
}

impl ServerHandler for TestHandler {
    fn on_describe(
        &self,
        _ctx: &rtsp_server::handler::ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<
        Output = rtsp_server::errors::RtspServerResult<(
            RtspResponse,
            Option<Arc<ServerStream>>,
        )>,
    > + Send {
        let stream = self.stream.clone();
        async move {
            match stream {
                Some(stream) => {
                    let response = RtspResponse::builder()
                        .status(RtspStatus::OK)
                        .header(RtspHeader::ContentType, "application/sdp")
                        .body(stream.sdp().to_string())
                        .build()?;
                    Ok((response, Some(stream)))
                }
                None => Ok((
                    rtsp_server::rtsp_server_simple_response(RtspStatus::NotFound),
                    None,
                )),
            }
        }
    }
}

async fn start_server(config: RtspServerConfig) -> (Arc<RtspServer<TestHandler>>, String) {
    start_server_with_stream(config, None).await
}

async fn start_server_with_stream(
    mut config: RtspServerConfig,
    stream: Option<Arc<ServerStream>>,
) -> (Arc<RtspServer<TestHandler>>, String) {
    config.rtsp_address = "127.0.0.1:0".parse().unwrap();
    let server = Arc::new(
        RtspServer::new(config, TestHandler { stream })
            .await
            .unwrap(),
    );
    let addr = server.local_rtsp_address();
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    (server, format!("rtsp://{}", addr))
}

type TestConn = Framed<tokio::net::TcpStream, RtspMessageFramed>;

async fn connect(base: &str) -> TestConn {
    let url: Url = base.parse().unwrap();
    let addr = format!(
        "{}:{}",
        url.host_str().unwrap(),
        url.port().unwrap_or(554)
    );
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, RtspMessageFramed)
}

async fn roundtrip(conn: &mut TestConn, request: RtspRequest) -> RtspResponse {
    conn.send(RtspMessage::Request(request)).await.unwrap();
    read_response(conn).await.expect("expected a response")
}

async fn read_response(conn: &mut TestConn) -> Option<RtspResponse> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), conn.next())
            .await
            .expect("read timed out")?;
        match message.unwrap() {
            RtspMessage::Response(response) => return Some(response),
            _ => continue,
        }
    }
}

fn request(method: RtspMethod, url: &str, cseq: u32) -> RtspRequest {
    RtspRequest::builder()
        .method(method)
        .uri(url.parse().unwrap())
        .header(RtspHeader::CSeq, cseq.to_string())
        .build()
        .unwrap()
}

const PUBLISH_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=test\r\nt=0 0\r\n\
m=video 0 RTP/AVP 96\r\na=control:trackID=0\r\na=rtpmap:96 H264/90000\r\n";

fn announce(url: &str, cseq: u32) -> RtspRequest {
    RtspRequest::builder()
        .method(RtspMethod::Announce)
        .uri(url.parse().unwrap())
        .header(RtspHeader::CSeq, cseq.to_string())
        .header(RtspHeader::ContentType, "application/sdp")
        .body(PUBLISH_SDP.to_owned())
        .build()
        .unwrap()
}

fn setup_tcp_record(url: &str, cseq: u32, channels: (u8, u8)) -> RtspRequest {
    RtspRequest::builder()
        .method(RtspMethod::Setup)
        .uri(format!("{}/trackID=0", url).parse().unwrap())
        .header(RtspHeader::CSeq, cseq.to_string())
        .header(
            RtspHeader::Transport,
            format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{};mode=RECORD",
                channels.0, channels.1
            ),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn options_echoes_cseq() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let mut conn = connect(&base).await;

    let response = roundtrip(&mut conn, request(RtspMethod::Options, &base, 5)).await;
    assert_eq!(response.status(), RtspStatus::OK);
    assert_eq!(response.headers().cseq(), Some(5));
    assert!(
        response
            .headers()
            .get_unique(RtspHeader::Public)
            .unwrap()
            .contains("SETUP")
    );
}

#[tokio::test]
async fn missing_cseq_yields_400_and_close() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let mut conn = connect(&base).await;

    let request = RtspRequest::builder()
        .method(RtspMethod::Options)
        .uri(base.parse().unwrap())
        .build()
        .unwrap();
    conn.send(RtspMessage::Request(request)).await.unwrap();

    let response = read_response(&mut conn).await.unwrap();
    assert_eq!(response.status(), RtspStatus::BadRequest);
    // the connection is gone afterwards
    let next = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("connection should close");
    assert!(next.is_none() || next.unwrap().is_err());
}

#[tokio::test]
async fn digest_md5_announce_round_trip() {
    let mut config = RtspServerConfig::default();
    config.auth = Some(ServerAuthConfig {
        realm: "IPCam".to_owned(),
        username: "myuser".to_owned(),
        password: "mypass".to_owned(),
        methods: vec![AuthMethod::DigestMd5],
    });
    let (_server, base) = start_server(config).await;
    let mut conn = connect(&base).await;
    let url = format!("{}/teststream", base);

    let denied = roundtrip(&mut conn, announce(&url, 1)).await;
    assert_eq!(denied.status(), RtspStatus::Unauthorized);
    let challenge = denied
        .headers()
        .get_unique(RtspHeader::WWWAuthenticate)
        .expect("challenge expected")
        .parse::<rtsp_formats::header::auth::WwwAuthenticate>()
        .unwrap();
    let rtsp_formats::header::auth::WwwAuthenticate::Digest { realm, nonce, .. } = challenge
    else {
        panic!("expected digest challenge");
    };
    assert_eq!(realm, "IPCam");

    let response_hash = digest_response(
        AuthAlgorithm::Md5,
        "myuser",
        &realm,
        "mypass",
        &nonce,
        RtspMethod::Announce,
        &url,
    );
    let mut authorized = announce(&url, 2);
    authorized.headers_mut().push(
        RtspHeader::Authorization,
        format!(
            "Digest username=\"myuser\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            realm, nonce, url, response_hash
        ),
    );
    let accepted = roundtrip(&mut conn, authorized).await;
    assert_eq!(accepted.status(), RtspStatus::OK);
}

#[tokio::test]
async fn play_with_unknown_session_yields_454() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let mut conn = connect(&base).await;

    let mut play = request(RtspMethod::Play, &format!("{}/stream", base), 3);
    play.headers_mut().push(RtspHeader::Session, "BOGUS");
    let response = roundtrip(&mut conn, play).await;
    assert_eq!(response.status(), RtspStatus::SessionNotFound);
}

#[tokio::test]
async fn second_connection_cannot_join_tcp_session() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let url = format!("{}/teststream", base);

    let mut first = connect(&base).await;
    assert_eq!(
        roundtrip(&mut first, announce(&url, 1)).await.status(),
        RtspStatus::OK
    );
    let setup_response = roundtrip(&mut first, setup_tcp_record(&url, 2, (0, 1))).await;
    assert_eq!(setup_response.status(), RtspStatus::OK);
    let session_id = setup_response.headers().session().unwrap().id;

    let mut second = connect(&base).await;
    assert_eq!(
        roundtrip(&mut second, announce(&url, 1)).await.status(),
        RtspStatus::OK
    );
    let mut hijack = setup_tcp_record(&url, 2, (2, 3));
    hijack
        .headers_mut()
        .push(RtspHeader::Session, session_id);
    let response = roundtrip(&mut second, hijack).await;
    assert_eq!(response.status(), RtspStatus::BadRequest);
}

#[tokio::test]
async fn connection_cannot_own_two_tcp_sessions() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let url = format!("{}/teststream", base);
    let mut conn = connect(&base).await;

    assert_eq!(
        roundtrip(&mut conn, announce(&url, 1)).await.status(),
        RtspStatus::OK
    );
    assert_eq!(
        roundtrip(&mut conn, setup_tcp_record(&url, 2, (0, 1)))
            .await
            .status(),
        RtspStatus::OK
    );

    // no Session header: this SETUP opens a second, distinct session on
    // the same connection
    let response = roundtrip(&mut conn, setup_tcp_record(&url, 3, (2, 3))).await;
    assert_eq!(response.status(), RtspStatus::BadRequest);
}

#[tokio::test]
async fn setup_while_recording_yields_455() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let url = format!("{}/teststream", base);
    let mut conn = connect(&base).await;

    assert_eq!(
        roundtrip(&mut conn, announce(&url, 1)).await.status(),
        RtspStatus::OK
    );
    let setup_response = roundtrip(&mut conn, setup_tcp_record(&url, 2, (0, 1))).await;
    let session_id = setup_response.headers().session().unwrap().id;

    let mut record = request(RtspMethod::Record, &url, 3);
    record
        .headers_mut()
        .push(RtspHeader::Session, session_id.clone());
    assert_eq!(
        roundtrip(&mut conn, record).await.status(),
        RtspStatus::OK
    );

    let mut late_setup = setup_tcp_record(&url, 4, (2, 3));
    late_setup
        .headers_mut()
        .push(RtspHeader::Session, session_id);
    assert_eq!(
        roundtrip(&mut conn, late_setup).await.status(),
        RtspStatus::MethodNotValidInThisState
    );
}

#[tokio::test]
async fn udp_setup_without_configured_ports_yields_461() {
    let (_server, base) = start_server(RtspServerConfig::default()).await;
    let url = format!("{}/teststream", base);
    let mut conn = connect(&base).await;

    assert_eq!(
        roundtrip(&mut conn, announce(&url, 1)).await.status(),
        RtspStatus::OK
    );
    let setup = RtspRequest::builder()
        .method(RtspMethod::Setup)
        .uri(format!("{}/trackID=0", url).parse().unwrap())
        .header(RtspHeader::CSeq, "2")
        .header(
            RtspHeader::Transport,
            "RTP/AVP;unicast;client_port=35000-35001;mode=RECORD",
        )
        .build()
        .unwrap();
    let response = roundtrip(&mut conn, setup).await;
    assert_eq!(response.status(), RtspStatus::UnsupportedTransport);
}

#[tokio::test]
async fn describe_returns_stream_sdp() {
    let stream = ServerStream::new(
        {
            let sdp: sdp_formats::session::Sdp = PUBLISH_SDP.parse().unwrap();
            sdp.media_descriptions()
        },
        Duration::from_secs(10),
    );
    let (_server, base) =
        start_server_with_stream(RtspServerConfig::default(), Some(stream)).await;
    let url = format!("{}/teststream", base);
    let mut conn = connect(&base).await;

    let response = roundtrip(&mut conn, request(RtspMethod::Describe, &url, 1)).await;
    assert_eq!(response.status(), RtspStatus::OK);
    assert!(response.body().unwrap().contains("a=control:trackID=0"));

    // a reader can now SETUP and PLAY against the described stream
    let setup = RtspRequest::builder()
        .method(RtspMethod::Setup)
        .uri(format!("{}/trackID=0", url).parse().unwrap())
        .header(RtspHeader::CSeq, "2")
        .header(RtspHeader::Transport, "RTP/AVP/TCP;unicast;interleaved=0-1")
        .build()
        .unwrap();
    let setup_response = roundtrip(&mut conn, setup).await;
    assert_eq!(setup_response.status(), RtspStatus::OK);
    let session_id = setup_response.headers().session().unwrap().id;

    let mut play = request(RtspMethod::Play, &url, 3);
    play.headers_mut().push(RtspHeader::Session, session_id);
    assert_eq!(roundtrip(&mut conn, play).await.status(), RtspStatus::OK);
}
