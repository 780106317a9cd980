pub mod fmtp;
pub mod rtpmap;

use std::fmt;

use crate::errors::SDPError;
use fmtp::FormatParameters;
use rtpmap::RtpMap;

/// An `a=` line. Attributes this library interprets get their own variant;
/// everything else is carried verbatim.
#[derive(Debug, Clone)]
pub enum SDPAttribute {
    Rtpmap(RtpMap),
    Fmtp(FormatParameters),
    Control(String),
    Trivial { name: String, value: Option<String> },
}

impl SDPAttribute {
    pub fn parse_line(line: &str) -> Result<Self, SDPError> {
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (line.trim(), None),
        };
        match (name, value) {
            ("rtpmap", Some(value)) => Ok(Self::Rtpmap(value.parse()?)),
            ("fmtp", Some(value)) => Ok(Self::Fmtp(value.parse()?)),
            ("control", Some(value)) => Ok(Self::Control(value.to_owned())),
            _ => Ok(Self::Trivial {
                name: name.to_owned(),
                value: value.map(str::to_owned),
            }),
        }
    }
}

impl fmt::Display for SDPAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtpmap(rtpmap) => write!(f, "rtpmap:{}", rtpmap),
            Self::Fmtp(fmtp) => write!(f, "fmtp:{}", fmtp),
            Self::Control(control) => write!(f, "control:{}", control),
            Self::Trivial { name, value } => match value {
                Some(value) => write!(f, "{}:{}", name, value),
                None => f.write_str(name),
            },
        }
    }
}
