use crate::{
    media::MediaDescription,
    session::{SDPMediaType, Sdp},
};

const CAMERA_SDP: &str = "v=0\r\n\
o=- 1681692777 1681692777 IN IP4 192.168.1.10\r\n\
s=Media Presentation\r\n\
c=IN IP4 0.0.0.0\r\n\
t=0 0\r\n\
a=control:*\r\n\
m=video 0 RTP/AVP 96\r\n\
a=control:trackID=0\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAKeKQFAe2AtwEBAaQeJEV,aM48gA==\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=control:trackID=1\r\n\
a=rtpmap:97 mpeg4-generic/44100/2\r\n\
a=fmtp:97 streamtype=5;profile-level-id=1;mode=AAC-hbr;config=1210\r\n";

#[test]
fn parse_camera_sdp() {
    let sdp: Sdp = CAMERA_SDP.parse().unwrap();
    assert_eq!(sdp.version, 0);
    assert_eq!(sdp.session_name, "Media Presentation");
    assert_eq!(sdp.media_description.len(), 2);

    let video = &sdp.media_description[0];
    assert_eq!(video.media_line.media_type, SDPMediaType::Video);
    assert_eq!(video.get_control(), Some("trackID=0"));
    assert_eq!(video.get_rtp_map().unwrap().clock_rate, 90000);
}

#[test]
fn digest_media_descriptions() {
    let sdp: Sdp = CAMERA_SDP.parse().unwrap();
    let media = sdp.media_descriptions();

    let video = &media[0];
    assert_eq!(video.formats[&96].encoding_name, "H264");
    let h264 = video.h264_parameters.as_ref().unwrap();
    assert!(!h264.sps.is_empty());
    assert!(!h264.pps.is_empty());

    let audio = &media[1];
    assert_eq!(audio.formats[&97].channels, Some(2));
    assert_eq!(audio.aac_config.as_deref(), Some(&[0x12, 0x10][..]));
}

#[test]
fn control_url_resolution() {
    let sdp: Sdp = CAMERA_SDP.parse().unwrap();
    let media = sdp.media_descriptions();
    let base = "rtsp://192.168.1.10/stream".parse().unwrap();
    assert_eq!(
        media[0].control_url(&base).unwrap().as_str(),
        "rtsp://192.168.1.10/stream/trackID=0"
    );
}

#[test]
fn serialize_round_trip() {
    let sdp: Sdp = CAMERA_SDP.parse().unwrap();
    let reparsed: Sdp = sdp.to_string().parse().unwrap();
    assert_eq!(reparsed.media_description.len(), 2);
    assert_eq!(
        reparsed.media_description[1].get_rtp_map().unwrap().encoding_name,
        "mpeg4-generic"
    );
}

#[test]
fn announce_body_generation() {
    let sdp: Sdp = CAMERA_SDP.parse().unwrap();
    let tracks: Vec<MediaDescription> = sdp.media_descriptions();
    let announced = Sdp::from_media_descriptions(&tracks);
    let text = announced.to_string();
    assert!(text.contains("a=control:trackID=0"));
    assert!(text.contains("a=rtpmap:96 H264/90000"));
    assert!(text.contains("m=audio 0 RTP/AVP 97"));
}
