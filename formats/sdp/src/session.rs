//! @see: RFC 8866 SDP: Session Description Protocol

use std::{fmt, str::FromStr};

use itertools::Itertools;

use crate::{CRLF, attributes::SDPAttribute, errors::SDPError};

#[derive(Debug, Default, Clone)]
pub enum SDPNetType {
    #[default]
    IN,
    Other(String),
}

impl From<&str> for SDPNetType {
    fn from(value: &str) -> Self {
        match value {
            "IN" => Self::IN,
            other => Self::Other(other.into()),
        }
    }
}

impl fmt::Display for SDPNetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IN => f.write_str("IN"),
            Self::Other(str) => f.write_str(str),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub enum SDPAddrType {
    #[default]
    IP4,
    IP6,
    Other(String),
}

impl From<&str> for SDPAddrType {
    fn from(value: &str) -> Self {
        match value {
            "IP4" => Self::IP4,
            "IP6" => Self::IP6,
            other => Self::Other(other.into()),
        }
    }
}

impl fmt::Display for SDPAddrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IP4 => f.write_str("IP4"),
            Self::IP6 => f.write_str("IP6"),
            Self::Other(str) => f.write_str(str),
        }
    }
}

/// 5.2. Origin ("o=")
/// o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>
#[derive(Debug, Clone)]
pub struct SDPOrigin {
    pub user_name: String,
    pub session_id: u64,
    pub session_version: u64,
    pub net_type: SDPNetType,
    pub addr_type: SDPAddrType,
    pub unicast_address: String,
}

impl Default for SDPOrigin {
    fn default() -> Self {
        Self {
            user_name: "-".to_owned(),
            session_id: 0,
            session_version: 0,
            net_type: Default::default(),
            addr_type: Default::default(),
            unicast_address: "0.0.0.0".to_owned(),
        }
    }
}

impl fmt::Display for SDPOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.user_name,
            self.session_id,
            self.session_version,
            self.net_type,
            self.addr_type,
            self.unicast_address,
        )
    }
}

impl FromStr for SDPOrigin {
    type Err = SDPError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(SDPError::SyntaxError(format!("invalid origin line: {}", s)));
        }
        Ok(Self {
            user_name: fields[0].to_owned(),
            session_id: fields[1].parse()?,
            session_version: fields[2].parse()?,
            net_type: fields[3].into(),
            addr_type: fields[4].into(),
            unicast_address: fields[5].to_owned(),
        })
    }
}

/// 5.7. Connection Information ("c=")
/// c=<nettype> <addrtype> <connection-address>
#[derive(Debug, Default, Clone)]
pub struct SDPConnection {
    pub net_type: SDPNetType,
    pub addr_type: SDPAddrType,
    pub address: String,
}

impl fmt::Display for SDPConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.net_type, self.addr_type, self.address)
    }
}

impl FromStr for SDPConnection {
    type Err = SDPError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(SDPError::SyntaxError(format!(
                "invalid connection line: {}",
                s
            )));
        }
        Ok(Self {
            net_type: fields[0].into(),
            addr_type: fields[1].into(),
            address: fields[2].to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SDPMediaType {
    Audio,
    Video,
    Application,
    Other(String),
}

impl From<&str> for SDPMediaType {
    fn from(value: &str) -> Self {
        match value {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "application" => Self::Application,
            other => Self::Other(other.into()),
        }
    }
}

impl fmt::Display for SDPMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
            Self::Application => f.write_str("application"),
            Self::Other(str) => f.write_str(str),
        }
    }
}

/// 5.14. Media Descriptions ("m=")
/// m=<media> <port> <proto> <fmt> ...
#[derive(Debug, Clone)]
pub struct SDPMediaLine {
    pub media_type: SDPMediaType,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<u8>,
}

impl fmt::Display for SDPMediaLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.media_type,
            self.port,
            self.protocol,
            self.formats.iter().map(|fmt| fmt.to_string()).join(" ")
        )
    }
}

impl FromStr for SDPMediaLine {
    type Err = SDPError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(SDPError::SyntaxError(format!("invalid media line: {}", s)));
        }
        let formats: Result<Vec<u8>, _> = fields[3..].iter().map(|fmt| fmt.parse()).collect();
        Ok(Self {
            media_type: fields[0].into(),
            port: fields[1].parse()?,
            protocol: fields[2].to_owned(),
            formats: formats?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SDPMediaDescription {
    pub media_line: SDPMediaLine,
    pub connection: Option<SDPConnection>,
    pub attributes: Vec<SDPAttribute>,
}

impl SDPMediaDescription {
    pub fn get_rtp_map(&self) -> Option<&crate::attributes::rtpmap::RtpMap> {
        self.attributes.iter().find_map(|attr| {
            if let SDPAttribute::Rtpmap(rtpmap) = attr {
                Some(rtpmap)
            } else {
                None
            }
        })
    }

    pub fn get_control(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| {
            if let SDPAttribute::Control(control) = attr {
                Some(control.as_str())
            } else {
                None
            }
        })
    }

    pub fn get_fmtp(&self) -> Option<&crate::attributes::fmtp::FormatParameters> {
        self.attributes.iter().find_map(|attr| {
            if let SDPAttribute::Fmtp(fmtp) = attr {
                Some(fmtp)
            } else {
                None
            }
        })
    }
}

impl fmt::Display for SDPMediaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={}{}", self.media_line, CRLF)?;
        if let Some(connection) = &self.connection {
            write!(f, "c={}{}", connection, CRLF)?;
        }
        self.attributes
            .iter()
            .try_for_each(|attr| write!(f, "a={}{}", attr, CRLF))
    }
}

#[derive(Debug, Clone)]
pub struct Sdp {
    pub version: u32,
    pub origin: SDPOrigin,
    pub session_name: String,
    pub connection: Option<SDPConnection>,
    pub attributes: Vec<SDPAttribute>,
    pub media_description: Vec<SDPMediaDescription>,
}

impl Default for Sdp {
    fn default() -> Self {
        Self {
            version: 0,
            origin: Default::default(),
            session_name: "Stream".to_owned(),
            connection: None,
            attributes: vec![],
            media_description: vec![],
        }
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}{}", self.version, CRLF)?;
        write!(f, "o={}{}", self.origin, CRLF)?;
        write!(f, "s={}{}", self.session_name, CRLF)?;
        if let Some(connection) = &self.connection {
            write!(f, "c={}{}", connection, CRLF)?;
        }
        write!(f, "t=0 0{}", CRLF)?;
        self.attributes
            .iter()
            .try_for_each(|attr| write!(f, "a={}{}", attr, CRLF))?;
        self.media_description
            .iter()
            .try_for_each(|media| write!(f, "{}", media))
    }
}

impl FromStr for Sdp {
    type Err = SDPError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut sdp = Sdp {
            session_name: String::new(),
            ..Default::default()
        };
        let mut current_media: Option<SDPMediaDescription> = None;

        for line in s.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                SDPError::SyntaxError(format!("sdp line without '=': {}", line))
            })?;
            match key {
                "v" => sdp.version = value.trim().parse()?,
                "o" => sdp.origin = value.parse()?,
                "s" => sdp.session_name = value.to_owned(),
                "c" => {
                    let connection = Some(value.parse()?);
                    match &mut current_media {
                        Some(media) => media.connection = connection,
                        None => sdp.connection = connection,
                    }
                }
                "m" => {
                    if let Some(media) = current_media.take() {
                        sdp.media_description.push(media);
                    }
                    current_media = Some(SDPMediaDescription {
                        media_line: value.parse()?,
                        connection: None,
                        attributes: vec![],
                    });
                }
                "a" => {
                    let attribute = SDPAttribute::parse_line(value)?;
                    match &mut current_media {
                        Some(media) => media.attributes.push(attribute),
                        None => sdp.attributes.push(attribute),
                    }
                }
                _ => {
                    // t=, b=, z=, k=, r= and friends are carried nowhere;
                    // serialization regenerates the mandatory ones
                    tracing::trace!("skipping sdp line: {}", line);
                }
            }
        }
        if let Some(media) = current_media.take() {
            sdp.media_description.push(media);
        }

        if sdp.session_name.is_empty() {
            sdp.session_name = " ".to_owned();
        }
        Ok(sdp)
    }
}
