#[cfg(test)]
mod tests {
    use url::Url;
    use utils::traits::reader::ReadFrom;

    use crate::{consts::methods::RtspMethod, header::RtspHeader, request::RtspRequest};

    #[test]
    fn options() {
        let request = RtspRequest::builder()
            .method(RtspMethod::Options)
            .uri("rtsp://localhost:8554/".parse::<Url>().unwrap())
            .header(RtspHeader::CSeq, "5")
            .build();
        assert!(request.is_ok());

        let text = "OPTIONS rtsp://localhost:8554/ RTSP/1.0\r\n\
CSeq: 5\r\n\r\n";

        assert_eq!(format!("{}", request.unwrap()).trim_end(), text.trim_end());
        let parsed = RtspRequest::read_from(text.as_bytes());
        assert!(parsed.is_ok());
        assert_eq!(text.trim_end(), format!("{}", parsed.unwrap()).trim_end());
    }

    #[test]
    fn describe() {
        let text = "DESCRIBE rtsp://server.example.com/fizzle/foo RTSP/1.0\r\n\
CSeq: 312\r\n\
Accept: application/sdp\r\n\r\n";
        let parsed = RtspRequest::read_from(text.as_bytes()).unwrap();
        assert_eq!(parsed.method(), RtspMethod::Describe);
        assert_eq!(parsed.headers().cseq(), Some(312));
        assert_eq!(text.trim_end(), format!("{}", parsed).trim_end());
    }

    #[test]
    fn setup_with_transport() {
        let request = RtspRequest::builder()
            .method(RtspMethod::Setup)
            .uri("rtsp://example.com/stream/trackID=0".parse::<Url>().unwrap())
            .header(RtspHeader::CSeq, "302")
            .header(
                RtspHeader::Transport,
                "RTP/AVP;unicast;client_port=4588-4589",
            )
            .build()
            .unwrap();

        let text = "SETUP rtsp://example.com/stream/trackID=0 RTSP/1.0\r\n\
CSeq: 302\r\n\
Transport: RTP/AVP;unicast;client_port=4588-4589\r\n\r\n";
        assert_eq!(text.trim_end(), format!("{}", request).trim_end());
        let parsed = RtspRequest::read_from(text.as_bytes()).unwrap();
        let transport = parsed.headers().transport().unwrap();
        assert_eq!(transport.client_port, Some((4588, 4589)));
    }

    #[test]
    fn announce_with_body() {
        let body = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=stream\r\n";
        let request = RtspRequest::builder()
            .method(RtspMethod::Announce)
            .uri("rtsp://localhost:8554/teststream".parse::<Url>().unwrap())
            .header(RtspHeader::CSeq, "2")
            .header(RtspHeader::ContentType, "application/sdp")
            .body(body.to_owned())
            .build()
            .unwrap();
        assert_eq!(
            request.headers().content_length(),
            Some(body.len()),
            "builder stamps Content-Length"
        );

        let round = RtspRequest::read_from(format!("{}", request).as_bytes()).unwrap();
        assert_eq!(round.body().map(String::as_str), Some(body));
    }

    #[test]
    fn missing_cseq_still_parses() {
        let text = "OPTIONS rtsp://localhost:8554/ RTSP/1.0\r\n\r\n";
        let parsed = RtspRequest::read_from(text.as_bytes()).unwrap();
        assert_eq!(parsed.headers().cseq(), None);
    }

    #[test]
    fn oversized_body_rejected() {
        let text = format!(
            "ANNOUNCE rtsp://localhost:8554/s RTSP/1.0\r\n\
CSeq: 1\r\n\
Content-Type: application/sdp\r\n\
Content-Length: {}\r\n\r\n",
            crate::MAX_BODY_SIZE + 1
        );
        assert!(RtspRequest::read_from(text.as_bytes()).is_err());
    }

    #[test]
    fn unknown_headers_are_skipped() {
        let text = "PLAY rtsp://example.com/audio RTSP/1.0\r\n\
CSeq: 836\r\n\
Session: 0123456789abcdef\r\n\
X-Dynamic-Rate: 1\r\n\r\n";
        let parsed = RtspRequest::read_from(text.as_bytes()).unwrap();
        assert_eq!(parsed.headers().session().unwrap().id, "0123456789abcdef");
    }
}
