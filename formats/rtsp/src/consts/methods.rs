//! @see: RFC 2326 section 10

use std::{fmt, str::FromStr};

use crate::errors::RtspMessageError;

pub mod method_names {
    pub const OPTIONS: &str = "OPTIONS";
    pub const DESCRIBE: &str = "DESCRIBE";
    pub const ANNOUNCE: &str = "ANNOUNCE";
    pub const SETUP: &str = "SETUP";
    pub const PLAY: &str = "PLAY";
    pub const RECORD: &str = "RECORD";
    pub const PAUSE: &str = "PAUSE";
    pub const TEARDOWN: &str = "TEARDOWN";
    pub const GET_PARAMETER: &str = "GET_PARAMETER";
    pub const SET_PARAMETER: &str = "SET_PARAMETER";
}

pub const RTSP_METHODS: [&str; 10] = [
    method_names::OPTIONS,
    method_names::DESCRIBE,
    method_names::ANNOUNCE,
    method_names::SETUP,
    method_names::PLAY,
    method_names::RECORD,
    method_names::PAUSE,
    method_names::TEARDOWN,
    method_names::GET_PARAMETER,
    method_names::SET_PARAMETER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtspMethod {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Record,
    Pause,
    TearDown,
    GetParameter,
    SetParameter,
}

impl From<&RtspMethod> for &'static str {
    fn from(value: &RtspMethod) -> Self {
        match value {
            RtspMethod::Options => method_names::OPTIONS,
            RtspMethod::Describe => method_names::DESCRIBE,
            RtspMethod::Announce => method_names::ANNOUNCE,
            RtspMethod::Setup => method_names::SETUP,
            RtspMethod::Play => method_names::PLAY,
            RtspMethod::Record => method_names::RECORD,
            RtspMethod::Pause => method_names::PAUSE,
            RtspMethod::TearDown => method_names::TEARDOWN,
            RtspMethod::GetParameter => method_names::GET_PARAMETER,
            RtspMethod::SetParameter => method_names::SET_PARAMETER,
        }
    }
}

impl FromStr for RtspMethod {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            method_names::OPTIONS => Ok(Self::Options),
            method_names::DESCRIBE => Ok(Self::Describe),
            method_names::ANNOUNCE => Ok(Self::Announce),
            method_names::SETUP => Ok(Self::Setup),
            method_names::PLAY => Ok(Self::Play),
            method_names::RECORD => Ok(Self::Record),
            method_names::PAUSE => Ok(Self::Pause),
            method_names::TEARDOWN => Ok(Self::TearDown),
            method_names::GET_PARAMETER => Ok(Self::GetParameter),
            method_names::SET_PARAMETER => Ok(Self::SetParameter),
            _ => Err(RtspMessageError::UnknownMethod(Some(s.into()))),
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let str: &str = self.into();
        f.write_str(str)
    }
}
