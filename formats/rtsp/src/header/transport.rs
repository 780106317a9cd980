use std::{fmt, str::FromStr};

use num::Integer;

use crate::errors::RtspMessageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    RtpAvpUdp,
    RtpAvpTcp,
}

impl TransportProtocol {
    pub fn is_udp(&self) -> bool {
        matches!(self, Self::RtpAvpUdp)
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::RtpAvpTcp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RtpAvpUdp => write!(f, "RTP/AVP"),
            Self::RtpAvpTcp => write!(f, "RTP/AVP/TCP"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCast {
    Unicast,
    Multicast,
}

impl fmt::Display for TransportCast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast => write!(f, "unicast"),
            Self::Multicast => write!(f, "multicast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Play,
    Record,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => write!(f, "PLAY"),
            Self::Record => write!(f, "RECORD"),
        }
    }
}

fn parse_number_range<T: FromStr + Integer + Copy>(s: &str) -> Result<(T, T), T::Err> {
    if !s.contains('-') {
        let value: T = s.parse::<T>()?;
        return Ok((value, value));
    }

    let (first, second) = s.split_once('-').unwrap();
    Ok((first.parse()?, second.parse()?))
}

/// The `Transport` header of SETUP requests and responses.
///
/// Productions handled:
/// `RTP/AVP[/UDP];(unicast|multicast);client_port=a-b;server_port=c-d;mode=PLAY|RECORD;ssrc=...`
/// `RTP/AVP/TCP;unicast;interleaved=n-n+1;mode=...`
///
/// Unknown parameters are ignored on parse; serialization emits a canonical
/// parameter order.
#[derive(Debug, Default, Clone)]
pub struct TransportHeader {
    pub protocol: Option<TransportProtocol>,
    pub cast: Option<TransportCast>,
    pub interleaved: Option<(u8, u8)>,
    pub ttl: Option<u8>,
    pub ssrc_list: Vec<u32>,
    pub mode: Option<TransportMode>,
    pub destination: Option<String>,
    pub client_port: Option<(u16, u16)>,
    pub server_port: Option<(u16, u16)>,
    pub port: Option<(u16, u16)>,
}

impl TransportHeader {
    pub fn is_tcp(&self) -> bool {
        self.protocol.map(|p| p.is_tcp()).unwrap_or(false)
    }

    pub fn is_multicast(&self) -> bool {
        matches!(self.cast, Some(TransportCast::Multicast))
    }
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = Vec::new();
        if let Some(protocol) = &self.protocol {
            result.push(format!("{}", protocol));
        }
        if let Some(cast) = &self.cast {
            result.push(format!("{}", cast));
        }
        if let Some(destination) = &self.destination {
            result.push(format!("destination={}", destination));
        }
        if let Some(interleaved) = &self.interleaved {
            result.push(format!("interleaved={}-{}", interleaved.0, interleaved.1));
        }
        if let Some(ttl) = &self.ttl {
            result.push(format!("ttl={}", ttl));
        }
        if let Some(port) = &self.port {
            result.push(format!("port={}-{}", port.0, port.1));
        }
        if let Some(client_port) = &self.client_port {
            result.push(format!("client_port={}-{}", client_port.0, client_port.1));
        }
        if let Some(server_port) = &self.server_port {
            result.push(format!("server_port={}-{}", server_port.0, server_port.1));
        }
        if !self.ssrc_list.is_empty() {
            result.push(format!(
                "ssrc={}",
                self.ssrc_list
                    .iter()
                    .map(|ssrc| format!("{:08X}", ssrc))
                    .collect::<Vec<String>>()
                    .join("/")
            ));
        }
        if let Some(mode) = &self.mode {
            result.push(format!("mode={}", mode));
        }
        write!(f, "{}", result.join(";"))
    }
}

impl FromStr for TransportHeader {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = Self::default();
        for param in s.split(';') {
            let (k, v) = param.split_once('=').unwrap_or((param, ""));
            match k.trim() {
                "RTP/AVP" | "RTP/AVP/UDP" => {
                    result.protocol = Some(TransportProtocol::RtpAvpUdp)
                }
                "RTP/AVP/TCP" => result.protocol = Some(TransportProtocol::RtpAvpTcp),
                "unicast" => result.cast = Some(TransportCast::Unicast),
                "multicast" => result.cast = Some(TransportCast::Multicast),
                "interleaved" => {
                    result.interleaved = Some(parse_number_range::<u8>(v).map_err(|err| {
                        RtspMessageError::InvalidTransportHeader(format!(
                            "parse interleaved failed: {}, {}",
                            v, err
                        ))
                    })?)
                }
                "ttl" => {
                    result.ttl = Some(v.parse().map_err(|err| {
                        RtspMessageError::InvalidTransportHeader(format!(
                            "parse ttl failed: {}, {}",
                            v, err,
                        ))
                    })?);
                }
                "ssrc" => {
                    for ssrc in v.split('/') {
                        let ssrc = u32::from_str_radix(ssrc.trim(), 16).map_err(|err| {
                            RtspMessageError::InvalidTransportHeader(format!(
                                "parse ssrc failed: {}, {}",
                                v, err
                            ))
                        })?;
                        result.ssrc_list.push(ssrc);
                    }
                }
                "mode" => {
                    result.mode = match v.trim().trim_matches('"').to_uppercase().as_str() {
                        "PLAY" => Some(TransportMode::Play),
                        "RECORD" => Some(TransportMode::Record),
                        other => {
                            return Err(RtspMessageError::InvalidTransportHeader(format!(
                                "unknown transport mode: {}",
                                other
                            )));
                        }
                    }
                }
                "destination" => {
                    if !v.is_empty() {
                        result.destination = Some(v.to_owned())
                    }
                }
                "port" => {
                    result.port = Some(parse_number_range::<u16>(v).map_err(|err| {
                        RtspMessageError::InvalidTransportHeader(format!(
                            "parse port range failed: {}, {}",
                            v, err
                        ))
                    })?);
                }
                "client_port" => {
                    result.client_port = Some(parse_number_range::<u16>(v).map_err(|err| {
                        RtspMessageError::InvalidTransportHeader(format!(
                            "parse client_port failed: {}, {}",
                            v, err
                        ))
                    })?)
                }
                "server_port" => {
                    result.server_port = Some(parse_number_range::<u16>(v).map_err(|err| {
                        RtspMessageError::InvalidTransportHeader(format!(
                            "parse server_port failed: {}, {}",
                            v, err
                        ))
                    })?)
                }
                _ => {
                    // ignore
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn udp_round_trip() {
        let text = "RTP/AVP;unicast;client_port=3456-3457;server_port=5000-5001;mode=PLAY";
        let parsed: TransportHeader = text.parse().unwrap();
        assert!(parsed.protocol.unwrap().is_udp());
        assert_eq!(parsed.cast, Some(TransportCast::Unicast));
        assert_eq!(parsed.client_port, Some((3456, 3457)));
        assert_eq!(parsed.server_port, Some((5000, 5001)));
        assert_eq!(parsed.mode, Some(TransportMode::Play));

        let reparsed: TransportHeader = parsed.to_string().parse().unwrap();
        assert_eq!(reparsed.client_port, parsed.client_port);
        assert_eq!(reparsed.server_port, parsed.server_port);
        assert_eq!(reparsed.mode, parsed.mode);
        assert_eq!(reparsed.cast, parsed.cast);
    }

    #[test]
    fn tcp_interleaved_round_trip() {
        let text = "RTP/AVP/TCP;unicast;interleaved=0-1;mode=RECORD";
        let parsed: TransportHeader = text.parse().unwrap();
        assert!(parsed.is_tcp());
        assert_eq!(parsed.interleaved, Some((0, 1)));
        assert_eq!(parsed.mode, Some(TransportMode::Record));
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn multicast_with_ttl() {
        let text = "RTP/AVP;multicast;destination=224.1.0.1;ttl=16;port=9000-9001";
        let parsed: TransportHeader = text.parse().unwrap();
        assert!(parsed.is_multicast());
        assert_eq!(parsed.ttl, Some(16));
        assert_eq!(parsed.port, Some((9000, 9001)));
        assert_eq!(parsed.destination.as_deref(), Some("224.1.0.1"));
    }

    #[test]
    fn parameter_order_is_insignificant() {
        let a: TransportHeader = "RTP/AVP;client_port=8000-8001;unicast".parse().unwrap();
        let b: TransportHeader = "RTP/AVP;unicast;client_port=8000-8001".parse().unwrap();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn unknown_parameters_ignored() {
        let parsed: TransportHeader = "RTP/AVP;unicast;client_port=8000-8001;x-dynamic=1"
            .parse()
            .unwrap();
        assert_eq!(parsed.client_port, Some((8000, 8001)));
    }

    #[test]
    fn quoted_mode_accepted() {
        let parsed: TransportHeader = "RTP/AVP/TCP;unicast;interleaved=2-3;mode=\"PLAY\""
            .parse()
            .unwrap();
        assert_eq!(parsed.mode, Some(TransportMode::Play));
    }
}
