use std::{
    fmt::{self, Write},
    io::{self, BufRead, Read, Seek},
    str::FromStr,
};

use byteorder::ReadBytesExt;
use consts::{
    common::{LF, SPACE_STR},
    methods::RtspMethod,
    version::RtspVersion,
};
use errors::RtspMessageError;
use interleaved::{DOLLAR_SIGN, RtspInterleavedPacket};
use request::RtspRequest;
use response::RtspResponse;
use tokio_util::{
    bytes::Buf,
    codec::{Decoder, Encoder},
};
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    reader::{TryReadFrom, TryReadRemainingFrom},
    writer::WriteTo,
};

pub mod consts;
pub mod errors;
pub mod header;
pub mod interleaved;
pub mod request;
pub mod response;
mod util;

/// Hard cap on RTSP message bodies.
pub const MAX_BODY_SIZE: usize = 128 * 1024;
/// Interleaved payloads carry a u16 length, so 64 KiB - 1 at most.
pub const MAX_INTERLEAVED_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// One unit of the RTSP TCP byte stream: an ASCII request or response, or a
/// `$`-framed binary packet interleaved between them.
#[derive(Debug)]
pub enum RtspMessage {
    Request(RtspRequest),
    Response(RtspResponse),
    Interleaved(RtspInterleavedPacket),
}

impl<R: AsRef<[u8]>> TryReadFrom<R> for RtspMessage {
    type Error = RtspMessageError;
    fn try_read_from(reader: &mut io::Cursor<R>) -> Result<Option<Self>, Self::Error> {
        if !reader.has_remaining() {
            return Ok(None);
        }

        let first_byte = reader.read_u8().unwrap();
        if first_byte == DOLLAR_SIGN {
            return RtspInterleavedPacket::try_read_remaining_from(first_byte, reader)
                .map(|interleaved| interleaved.map(Self::Interleaved));
        }
        reader.seek_relative(-1).unwrap();

        if !reader.fill_buf()?.contains(&LF) {
            return Ok(None);
        }
        let mut first_line = String::new();
        reader.fill_buf()?.read_line(&mut first_line)?;
        if let Some((first_word, _)) = first_line.split_once(SPACE_STR) {
            if let Ok(method) = RtspMethod::from_str(first_word) {
                reader.consume(first_word.len());
                return RtspRequest::try_read_remaining_from(method, reader)
                    .map(|req| req.map(Self::Request));
            }

            if let Ok(version) = RtspVersion::from_str(first_word) {
                reader.consume(first_word.len());
                return RtspResponse::try_read_remaining_from(version, reader)
                    .map(|res| res.map(Self::Response));
            }
        }

        Err(RtspMessageError::InvalidRtspMessageFormat(format!(
            "not a rtsp message: {}",
            first_line
        )))
    }
}

impl<W: io::Write> WriteTo<W> for RtspMessage {
    type Error = RtspMessageError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        match self {
            Self::Request(req) => write!(writer, "{}", req)?,
            Self::Response(res) => write!(writer, "{}", res)?,
            Self::Interleaved(interleaved) => interleaved.write_to(writer)?,
        }
        Ok(())
    }
}

impl fmt::Display for RtspMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(req) => write!(f, "{}", req),
            Self::Response(res) => write!(f, "{}", res),
            Self::Interleaved(interleaved) => {
                write!(
                    f,
                    "interleaved channel={} len={}",
                    interleaved.channel_id,
                    interleaved.get_packet_bytes_count()
                )
            }
        }
    }
}

/// Codec multiplexing interleaved frames and ASCII messages on one stream.
#[derive(Debug)]
pub struct RtspMessageFramed;

impl Encoder<RtspMessage> for RtspMessageFramed {
    type Error = RtspMessageError;

    fn encode(
        &mut self,
        item: RtspMessage,
        dst: &mut tokio_util::bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            RtspMessage::Interleaved(ref interleaved) => {
                let mut bytes = Vec::with_capacity(interleaved.get_packet_bytes_count());
                interleaved.write_to(&mut bytes)?;
                dst.extend_from_slice(&bytes);
            }
            text => dst.write_fmt(format_args!("{}", text))?,
        }
        Ok(())
    }
}

impl Decoder for RtspMessageFramed {
    type Error = RtspMessageError;
    type Item = RtspMessage;

    fn decode(
        &mut self,
        src: &mut tokio_util::bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        let (res, position) = {
            let mut cursor = io::Cursor::new(&src);
            let res = RtspMessage::try_read_from(cursor.by_ref());
            (res, cursor.position())
        };
        if let Ok(Some(_)) = &res {
            src.advance(position as usize);
        }
        res
    }
}

#[cfg(test)]
mod test {
    use tokio_util::{bytes::BytesMut, codec::Decoder, codec::Encoder};

    use super::*;

    #[test]
    fn decode_interleaved_frame() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(&[0x24, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04][..]);
        let decoded = framed.decode(&mut src).unwrap().unwrap();
        let RtspMessage::Interleaved(packet) = decoded else {
            panic!("expected interleaved packet");
        };
        assert_eq!(packet.channel_id, 0);
        assert_eq!(packet.payload.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
        assert!(src.is_empty());
    }

    #[test]
    fn interleaved_frame_round_trip() {
        let payload: Vec<u8> = (0..=255).cycle().take(1400).collect();
        let packet = RtspInterleavedPacket::builder()
            .channel(3)
            .payload(&payload)
            .build();
        let mut framed = RtspMessageFramed;
        let mut buffer = BytesMut::new();
        framed
            .encode(RtspMessage::Interleaved(packet), &mut buffer)
            .unwrap();

        let decoded = framed.decode(&mut buffer).unwrap().unwrap();
        let RtspMessage::Interleaved(packet) = decoded else {
            panic!("expected interleaved packet");
        };
        assert_eq!(packet.channel_id, 3);
        assert_eq!(packet.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn decode_incomplete_frame_waits() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(&[0x24, 0x00, 0x00, 0x04, 0x01][..]);
        assert!(framed.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 5, "nothing consumed until the frame completes");
    }

    #[test]
    fn decode_request_then_frame_on_same_stream() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(
            &b"OPTIONS rtsp://localhost:8554/ RTSP/1.0\r\nCSeq: 5\r\n\r\n\x24\x01\x00\x02\xAA\xBB"
                [..],
        );
        let first = framed.decode(&mut src).unwrap().unwrap();
        assert!(matches!(first, RtspMessage::Request(_)));
        let second = framed.decode(&mut src).unwrap().unwrap();
        let RtspMessage::Interleaved(packet) = second else {
            panic!("expected interleaved packet");
        };
        assert_eq!(packet.channel_id, 1);
        assert_eq!(packet.payload.as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn decode_partial_text_message_waits() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(&b"OPTIONS rtsp://localhost:8554/ RTSP/1.0\r\nCSeq: 5\r\n"[..]);
        assert!(framed.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn decode_header_fragmented_mid_line_waits() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(&b"OPTIONS rtsp://localhost:8554/ RTSP/1.0\r\nCSe"[..]);
        assert!(framed.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(b"q: 5\r\n\r\n");
        let decoded = framed.decode(&mut src).unwrap().unwrap();
        let RtspMessage::Request(request) = decoded else {
            panic!("expected request");
        };
        assert_eq!(request.headers().cseq(), Some(5));
    }

    #[test]
    fn garbage_is_rejected() {
        let mut framed = RtspMessageFramed;
        let mut src = BytesMut::from(&b"GARBAGE everywhere\r\n\r\n"[..]);
        assert!(framed.decode(&mut src).is_err());
    }
}
