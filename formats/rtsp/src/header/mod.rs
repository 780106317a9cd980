pub mod auth;
pub mod header_names;
pub mod range;
pub mod rtp_info;
pub mod session;
pub mod transport;

use std::{
    fmt,
    io::{self, Read},
    str::FromStr,
};

use range::RangeHeader;
use session::SessionHeader;
use tokio_util::bytes::Buf;
use transport::TransportHeader;
use utils::traits::reader::TryReadFrom;

use crate::{consts::common::CRLF_STR, errors::RtspMessageError, util::TextReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspHeader {
    Accept,
    AcceptRanges,
    Authorization,
    Connection,
    ContentBase,
    ContentLength,
    ContentType,
    CSeq,
    Date,
    Expires,
    Location,
    Public,
    Range,
    Require,
    RtpInfo,
    Server,
    Session,
    Supported,
    Transport,
    Unsupported,
    UserAgent,
    Via,
    WWWAuthenticate,
}

impl From<&RtspHeader> for &'static str {
    fn from(value: &RtspHeader) -> Self {
        match value {
            RtspHeader::Accept => header_names::ACCEPT,
            RtspHeader::AcceptRanges => header_names::ACCEPT_RANGES,
            RtspHeader::Authorization => header_names::AUTHORIZATION,
            RtspHeader::Connection => header_names::CONNECTION,
            RtspHeader::ContentBase => header_names::CONTENT_BASE,
            RtspHeader::ContentLength => header_names::CONTENT_LENGTH,
            RtspHeader::ContentType => header_names::CONTENT_TYPE,
            RtspHeader::CSeq => header_names::C_SEQ,
            RtspHeader::Date => header_names::DATE,
            RtspHeader::Expires => header_names::EXPIRES,
            RtspHeader::Location => header_names::LOCATION,
            RtspHeader::Public => header_names::PUBLIC,
            RtspHeader::Range => header_names::RANGE,
            RtspHeader::Require => header_names::REQUIRE,
            RtspHeader::RtpInfo => header_names::RTP_INFO,
            RtspHeader::Server => header_names::SERVER,
            RtspHeader::Session => header_names::SESSION,
            RtspHeader::Supported => header_names::SUPPORTED,
            RtspHeader::Transport => header_names::TRANSPORT,
            RtspHeader::Unsupported => header_names::UNSUPPORTED,
            RtspHeader::UserAgent => header_names::USER_AGENT,
            RtspHeader::Via => header_names::VIA,
            RtspHeader::WWWAuthenticate => header_names::WWW_AUTHENTICATE,
        }
    }
}

impl fmt::Display for RtspHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str: &str = self.into();
        f.write_str(str)
    }
}

impl FromStr for RtspHeader {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // header names are case-insensitive on the wire
        let lowered = s.to_ascii_lowercase();
        match lowered.as_str() {
            "accept" => Ok(Self::Accept),
            "accept-ranges" => Ok(Self::AcceptRanges),
            "authorization" => Ok(Self::Authorization),
            "connection" => Ok(Self::Connection),
            "content-base" => Ok(Self::ContentBase),
            "content-length" => Ok(Self::ContentLength),
            "content-type" => Ok(Self::ContentType),
            "cseq" => Ok(Self::CSeq),
            "date" => Ok(Self::Date),
            "expires" => Ok(Self::Expires),
            "location" => Ok(Self::Location),
            "public" => Ok(Self::Public),
            "range" => Ok(Self::Range),
            "require" => Ok(Self::Require),
            "rtp-info" => Ok(Self::RtpInfo),
            "server" => Ok(Self::Server),
            "session" => Ok(Self::Session),
            "supported" => Ok(Self::Supported),
            "transport" => Ok(Self::Transport),
            "unsupported" => Ok(Self::Unsupported),
            "user-agent" => Ok(Self::UserAgent),
            "via" => Ok(Self::Via),
            "www-authenticate" => Ok(Self::WWWAuthenticate),
            _ => Err(RtspMessageError::UnknownHeader(Some(s.into()))),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RtspHeaders(Vec<(RtspHeader, String)>);

impl RtspHeaders {
    pub fn new(items: Vec<(RtspHeader, String)>) -> Self {
        Self(items)
    }

    pub fn push<S: Into<String>>(&mut self, key: RtspHeader, value: S) {
        self.0.push((key, value.into()));
    }

    pub fn append(&mut self, mut items: Vec<(RtspHeader, String)>) {
        self.0.append(&mut items);
    }

    pub fn get(&self, key: RtspHeader) -> Vec<&String> {
        self.0
            .iter()
            .filter(|(k, _)| k.eq(&key))
            .map(|(_, value)| value)
            .collect()
    }

    pub fn get_unique(&self, key: RtspHeader) -> Option<&String> {
        self.get(key).first().copied()
    }

    pub fn contains(&self, key: RtspHeader) -> bool {
        self.0.iter().any(|(k, _)| k.eq(&key))
    }

    pub fn remove(&mut self, key: RtspHeader) {
        self.0.retain(|(k, _)| k.ne(&key));
    }

    pub fn set<S: Into<String>>(&mut self, key: RtspHeader, value: S) {
        self.remove(key);
        self.push(key, value.into());
    }

    pub fn entries(&self) -> &Vec<(RtspHeader, String)> {
        &self.0
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_unique(RtspHeader::CSeq)
            .and_then(|cseq| cseq.trim().parse().ok())
    }

    pub fn transport(&self) -> Option<TransportHeader> {
        self.get_unique(RtspHeader::Transport)
            .and_then(|trans| trans.parse().ok())
    }

    pub fn session(&self) -> Option<SessionHeader> {
        self.get_unique(RtspHeader::Session)
            .and_then(|session| session.parse().ok())
    }

    pub fn range(&self) -> Option<RangeHeader> {
        self.get_unique(RtspHeader::Range)
            .and_then(|range| range.parse().ok())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get_unique(RtspHeader::ContentLength)
            .and_then(|len| len.trim().parse().ok())
    }
}

impl fmt::Display for RtspHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.entries().iter().try_for_each(|(key, value)| {
            f.write_fmt(format_args!("{}: {}{}", key, value, CRLF_STR))
        })
    }
}

impl<R: AsRef<[u8]>> TryReadFrom<R> for RtspHeaders {
    type Error = RtspMessageError;
    fn try_read_from(reader: &mut io::Cursor<R>) -> Result<Option<Self>, Self::Error> {
        if !reader.has_remaining() {
            return Ok(None);
        }
        let mut text_reader = TextReader::new(reader.by_ref());
        let mut headers = vec![];
        loop {
            let line = text_reader.read_line()?;
            if line.is_none() {
                // at least CRLF should be there
                return Ok(None);
            }

            let line = line.unwrap();
            if !line.ends_with('\n') {
                // a header line fragmented mid-stream, wait for the rest
                return Ok(None);
            }
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() {
                break;
            }
            let parts: Vec<_> = trimmed_line.split(":").collect();
            if parts.len() < 2 {
                return Err(RtspMessageError::InvalidRtspMessageFormat(format!(
                    "invalid header line: {}",
                    line
                )));
            }

            match parts[0].parse::<RtspHeader>() {
                Ok(key) => {
                    let value = parts[1..].join(":");
                    headers.push((key, value.trim().to_owned()));
                }
                // headers this library does not model pass through silently
                Err(RtspMessageError::UnknownHeader(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(Some(Self(headers)))
    }
}
