use std::io::{self, Cursor, Read};

use tokio_util::bytes::Bytes;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket, reader::ReadFrom, writer::WriteTo,
};

use crate::{errors::RtpError, header::RtpHeader};

#[derive(Debug, Clone, Default)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn parse(data: &[u8]) -> Result<Self, RtpError> {
        if data.len() < 12 {
            return Err(RtpError::PacketTooShort(data.len()));
        }
        Self::read_from(Cursor::new(data))
    }

    pub fn to_bytes(&self) -> Result<Bytes, RtpError> {
        let mut buffer = Vec::with_capacity(self.get_packet_bytes_count());
        self.write_to(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }
}

impl DynamicSizedPacket for RtpPacket {
    fn get_packet_bytes_count(&self) -> usize {
        self.header.get_packet_bytes_count() + self.payload.len()
    }
}

impl<R: io::Read> ReadFrom<R> for RtpPacket {
    type Error = RtpError;
    fn read_from(mut reader: R) -> Result<Self, Self::Error> {
        let header = RtpHeader::read_from(&mut reader)?;
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload)?;
        if header.padding && !payload.is_empty() {
            let padding_bytes = *payload.last().unwrap() as usize;
            if padding_bytes == 0 || padding_bytes > payload.len() {
                return Err(RtpError::PacketTooShort(payload.len()));
            }
            payload.truncate(payload.len() - padding_bytes);
        }
        Ok(Self {
            header,
            payload: Bytes::from(payload),
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtpPacket {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.header.write_to(writer)?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let packet = RtpPacket::new(
            RtpHeader {
                marker: true,
                payload_type: 96,
                sequence_number: 4660,
                timestamp: 0x01020304,
                ssrc: 0xDEADBEEF,
                ..Default::default()
            },
            Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        );
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);

        let parsed = RtpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.header.payload_type, 96);
        assert!(parsed.header.marker);
        assert_eq!(parsed.header.sequence_number, 4660);
        assert_eq!(parsed.header.ssrc, 0xDEADBEEF);
        assert_eq!(parsed.payload.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn padding_is_stripped() {
        // 12-byte header with P bit + payload 0xAA + 3 padding bytes (last = 3)
        let mut data = vec![0xA0, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(&[0xAA, 0x00, 0x00, 0x03]);
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload.as_ref(), &[0xAA]);
    }

    #[test]
    fn short_packet_rejected() {
        assert!(matches!(
            RtpPacket::parse(&[0x80, 96, 0]),
            Err(RtpError::PacketTooShort(3))
        ));
    }

    #[test]
    fn wrong_version_rejected() {
        let data = [0x40, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            RtpPacket::parse(&data),
            Err(RtpError::InvalidVersion(1))
        ));
    }
}
