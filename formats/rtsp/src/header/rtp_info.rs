//! The `RTP-Info` header of PLAY responses.

use std::{fmt, str::FromStr};

use crate::{errors::RtspMessageError, util::split_comma_params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpInfoEntry {
    pub url: String,
    pub seq: Option<u16>,
    pub rtptime: Option<u32>,
}

impl fmt::Display for RtpInfoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "url={}", self.url)?;
        if let Some(seq) = self.seq {
            write!(f, ";seq={}", seq)?;
        }
        if let Some(rtptime) = self.rtptime {
            write!(f, ";rtptime={}", rtptime)?;
        }
        Ok(())
    }
}

impl FromStr for RtpInfoEntry {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut url = None;
        let mut seq = None;
        let mut rtptime = None;
        for param in s.split(';') {
            let (k, v) = param.split_once('=').unwrap_or((param, ""));
            match k.trim() {
                "url" => url = Some(v.trim().to_owned()),
                "seq" => {
                    seq = Some(v.trim().parse().map_err(|_| {
                        RtspMessageError::InvalidRtspMessageFormat(format!(
                            "invalid RTP-Info seq: {}",
                            v
                        ))
                    })?)
                }
                "rtptime" => {
                    rtptime = Some(v.trim().parse().map_err(|_| {
                        RtspMessageError::InvalidRtspMessageFormat(format!(
                            "invalid RTP-Info rtptime: {}",
                            v
                        ))
                    })?)
                }
                _ => {}
            }
        }
        Ok(Self {
            url: url.ok_or_else(|| {
                RtspMessageError::InvalidRtspMessageFormat(
                    "RTP-Info entry without url".to_owned(),
                )
            })?,
            seq,
            rtptime,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RtpInfo(pub Vec<RtpInfoEntry>);

impl fmt::Display for RtpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&entries.join(","))
    }
}

impl FromStr for RtpInfo {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries: Result<Vec<_>, _> =
            split_comma_params(s).iter().map(|e| e.parse()).collect();
        Ok(Self(entries?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let text = "url=rtsp://host/stream/trackID=0;seq=12345;rtptime=3450012,\
                    url=rtsp://host/stream/trackID=1;seq=99";
        let parsed: RtpInfo = text.parse().unwrap();
        assert_eq!(parsed.0.len(), 2);
        assert_eq!(parsed.0[0].seq, Some(12345));
        assert_eq!(parsed.0[0].rtptime, Some(3450012));
        assert_eq!(parsed.0[1].rtptime, None);
        assert_eq!(parsed.to_string(), text);
    }
}
