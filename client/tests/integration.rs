//! End-to-end tests: the client against an in-process server.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rtp_formats::{header::RtpHeader, packet::RtpPacket};
use rtsp_client::{
    ClientCallbacks, ClientSession, PacketKind, RtspClientConfig, RtspClientError,
    RtspTransport,
};
use rtsp_formats::{
    consts::status::RtspStatus, header::RtspHeader, request::RtspRequest,
    response::RtspResponse,
};
use rtsp_server::{
    config::RtspServerConfig, errors::RtspServerResult, handler::ServerHandler,
    server::RtspServer, stream::ServerStream,
};
use tokio_util::bytes::Bytes;
use url::Url;

const TEST_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=test\r\nt=0 0\r\n\
m=video 0 RTP/AVP 96\r\na=control:trackID=0\r\na=rtpmap:96 H264/90000\r\n";

fn test_tracks() -> Vec<sdp_formats::media::MediaDescription> {
    let sdp: sdp_formats::session::Sdp = TEST_SDP.parse().unwrap();
    sdp.media_descriptions()
}

type PacketLog = Arc<Mutex<Vec<(usize, Vec<u8>)>>>;

struct TestHandler {
    stream: Option<Arc<ServerStream>>,
    publisher_packets: PacketLog,
}

impl ServerHandler for TestHandler {
    fn on_describe(
        &self,
        _ctx: &rtsp_server::handler::ConnContext,
        _request: &RtspRequest,
    ) -> impl Future<Output = RtspServerResult<(RtspResponse, Option<Arc<ServerStream>>)>> + Send
    {
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

    fn on_packet_rtp(
        &self,
        _ctx: &rtsp_server::handler::SessionContext,
        track_id: usize,
        packet: &RtpPacket,
    ) {
        self.publisher_packets
            .lock()
            .unwrap()
            .push((track_id, packet.payload.to_vec()));
    }
}

async fn start_server(
    mut config: RtspServerConfig,
    stream: Option<Arc<ServerStream>>,
) -> (Arc<RtspServer<TestHandler>>, Url, PacketLog) {
    config.rtsp_address = "127.0.0.1:0".parse().unwrap();
    let publisher_packets: PacketLog = Arc::new(Mutex::new(Vec::new()));
    let server = Arc::new(
        RtspServer::new(
            config,
            TestHandler {
                stream,
                publisher_packets: publisher_packets.clone(),
            },
        )
        .await
        .unwrap(),
    );
    let url: Url = format!("rtsp://{}/teststream", server.local_rtsp_address())
        .parse()
        .unwrap();
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    (server, url, publisher_packets)
}

fn served_stream() -> Arc<ServerStream> {
    ServerStream::new(test_tracks(), Duration::from_secs(10))
}

#[tokio::test]
async fn tcp_interleaved_play_delivers_payload() {
    let stream = served_stream();
    let (_server, url, _) = start_server(RtspServerConfig::default(), Some(stream.clone())).await;

    let received: PacketLog = Arc::new(Mutex::new(Vec::new()));
    let callbacks = {
        let received = received.clone();
        ClientCallbacks::new().with_on_packet_rtp(move |track_id, packet| {
            received
                .lock()
                .unwrap()
                .push((track_id, packet.payload.to_vec()));
        })
    };

    let config = RtspClientConfig {
        transport: Some(RtspTransport::Tcp),
        ..Default::default()
    };
    let session = ClientSession::dial_read(config, url, callbacks).await.unwrap();
    assert_eq!(session.transport(), RtspTransport::Tcp);

    let mut packet = RtpPacket::new(
        RtpHeader {
            payload_type: 96,
            sequence_number: 1,
            ..Default::default()
        },
        Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
    );
    stream.write_packet_rtp(0, &mut packet).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let received = received.lock().unwrap();
            if let Some((track_id, payload)) = received.first() {
                assert_eq!(*track_id, 0);
                assert_eq!(payload.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
                break;
            }
        }
        assert!(Instant::now() < deadline, "payload never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.teardown().await.unwrap();
}

#[tokio::test]
async fn udp_refusal_downgrades_to_tcp() {
    // no UDP pair configured: every UDP SETUP is refused with 461
    let stream = served_stream();
    let (_server, url, _) = start_server(RtspServerConfig::default(), Some(stream)).await;

    let config = RtspClientConfig {
        transport: None,
        ..Default::default()
    };
    let session = ClientSession::dial_read(config, url, ClientCallbacks::new())
        .await
        .unwrap();
    assert_eq!(
        session.transport(),
        RtspTransport::Tcp,
        "client should have fallen back to tcp"
    );
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn publisher_udp_refusal_downgrades_to_tcp() {
    // no UDP pair configured: the publisher's UDP SETUP is refused with 461
    let (_server, url, publisher_packets) = start_server(RtspServerConfig::default(), None).await;

    let config = RtspClientConfig {
        transport: None,
        ..Default::default()
    };
    let session = ClientSession::dial_publish(config, url, test_tracks(), ClientCallbacks::new())
        .await
        .unwrap();
    assert_eq!(
        session.transport(),
        RtspTransport::Tcp,
        "publisher should have fallen back to tcp"
    );

    let packet = RtpPacket::new(
        RtpHeader {
            payload_type: 96,
            sequence_number: 1,
            ..Default::default()
        },
        Bytes::from_static(&[0x0F]),
    );
    session
        .write_frame(0, PacketKind::Rtp, packet.to_bytes().unwrap())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let packets = publisher_packets.lock().unwrap();
            if let Some((track_id, payload)) = packets.first() {
                assert_eq!(*track_id, 0);
                assert_eq!(payload.as_slice(), &[0x0F]);
                break;
            }
        }
        assert!(Instant::now() < deadline, "publisher packet never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.teardown().await.unwrap();
}

#[tokio::test]
async fn pinned_udp_without_packets_fails_within_initial_timeout() {
    let mut server_config = RtspServerConfig::default();
    server_config.udp_rtp_address = Some("127.0.0.1:36200".parse().unwrap());
    server_config.udp_rtcp_address = Some("127.0.0.1:36201".parse().unwrap());
    let stream = served_stream();
    let (_server, url, _) = start_server(server_config, Some(stream)).await;

    let config = RtspClientConfig {
        transport: Some(RtspTransport::Udp),
        initial_udp_read_timeout: Duration::from_millis(500),
        ..Default::default()
    };
    let started = Instant::now();
    let result = ClientSession::dial_read(config, url, ClientCallbacks::new()).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(RtspClientError::NoUDPPacketsRecently)
    ));
    assert!(
        elapsed < Duration::from_secs(3),
        "gave up after {:?}, expected roughly the initial timeout",
        elapsed
    );
}

#[tokio::test]
async fn udp_publish_reaches_the_server() {
    let mut server_config = RtspServerConfig::default();
    server_config.udp_rtp_address = Some("127.0.0.1:36300".parse().unwrap());
    server_config.udp_rtcp_address = Some("127.0.0.1:36301".parse().unwrap());
    let (_server, url, publisher_packets) = start_server(server_config, None).await;

    let config = RtspClientConfig {
        transport: Some(RtspTransport::Udp),
        ..Default::default()
    };
    let session =
        ClientSession::dial_publish(config, url, test_tracks(), ClientCallbacks::new())
            .await
            .unwrap();

    let packet = RtpPacket::new(
        RtpHeader {
            payload_type: 96,
            sequence_number: 7,
            ssrc: 0x4242_4242,
            ..Default::default()
        },
        Bytes::from_static(&[0xAA, 0xBB]),
    );
    let payload = packet.to_bytes().unwrap();
    session.write_frame(0, PacketKind::Rtp, payload).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        {
            let packets = publisher_packets.lock().unwrap();
            if let Some((track_id, payload)) = packets.first() {
                assert_eq!(*track_id, 0);
                assert_eq!(payload.as_slice(), &[0xAA, 0xBB]);
                break;
            }
        }
        assert!(Instant::now() < deadline, "publisher packet never arrived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    session.teardown().await.unwrap();
}

#[tokio::test]
async fn pause_and_resume_round_trip() {
    let stream = served_stream();
    let (_server, url, _) = start_server(RtspServerConfig::default(), Some(stream)).await;

    let config = RtspClientConfig {
        transport: Some(RtspTransport::Tcp),
        ..Default::default()
    };
    let session = ClientSession::dial_read(config, url, ClientCallbacks::new())
        .await
        .unwrap();
    assert!(session.session_id().await.is_some());

    session.pause().await.unwrap();
    session.play().await.unwrap();
    session.teardown().await.unwrap();
}

#[tokio::test]
async fn teardown_twice_reports_terminated() {
    let stream = served_stream();
    let (_server, url, _) = start_server(RtspServerConfig::default(), Some(stream)).await;

    let config = RtspClientConfig {
        transport: Some(RtspTransport::Tcp),
        ..Default::default()
    };
    let session = ClientSession::dial_read(config, url, ClientCallbacks::new())
        .await
        .unwrap();
    session.teardown().await.unwrap();
    // the session task has exited; further commands surface Terminated
    assert!(matches!(
        session.play().await,
        Err(RtspClientError::Terminated)
    ));
}
