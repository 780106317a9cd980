//! Digested view of an SDP media section, the form the RTSP session layers
//! consume: control path, payload-type map, clock rate, codec side data.

use std::collections::BTreeMap;

use base64::Engine;
use url::Url;

use crate::{
    attributes::{SDPAttribute, fmtp::FormatParameters, rtpmap::RtpMap},
    errors::{SDPError, SDPResult},
    session::{Sdp, SDPMediaDescription, SDPMediaLine, SDPMediaType},
};

/// One payload type of a media section.
#[derive(Debug, Default, Clone)]
pub struct RtpFormat {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
    pub channels: Option<u32>,
    pub parameters: Option<String>,
}

/// H.264 sequence/picture parameter sets from `sprop-parameter-sets`.
#[derive(Debug, Clone)]
pub struct H264Parameters {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media_type: SDPMediaType,
    /// `a=control` value, absolute URL or path relative to the content base.
    pub control: Option<String>,
    pub formats: BTreeMap<u8, RtpFormat>,
    pub h264_parameters: Option<H264Parameters>,
    /// AudioSpecificConfig blob from an AAC `config=` parameter.
    pub aac_config: Option<Vec<u8>>,
}

impl MediaDescription {
    /// Primary clock rate of the section, from its first rtpmap.
    pub fn clock_rate(&self) -> Option<u32> {
        self.formats.values().next().map(|fmt| fmt.clock_rate)
    }

    /// Resolves the control attribute against the DESCRIBE content base.
    pub fn control_url(&self, content_base: &Url) -> SDPResult<Url> {
        let Some(control) = &self.control else {
            return Ok(content_base.clone());
        };
        if control == "*" {
            return Ok(content_base.clone());
        }
        if let Ok(absolute) = control.parse::<Url>() {
            return Ok(absolute);
        }
        // relative controls append to the base path
        let mut base = content_base.as_str().to_owned();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(format!("{}{}", base, control).parse()?)
    }
}

fn parse_sprop_parameter_sets(value: &str) -> SDPResult<H264Parameters> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut sets = value.split(',');
    let sps = sets.next().map(|s| engine.decode(s.trim())).transpose().map_err(|err| {
        SDPError::InvalidFormatParameter(format!("sprop-parameter-sets sps: {}", err))
    })?;
    let pps = sets.next().map(|s| engine.decode(s.trim())).transpose().map_err(|err| {
        SDPError::InvalidFormatParameter(format!("sprop-parameter-sets pps: {}", err))
    })?;
    match (sps, pps) {
        (Some(sps), Some(pps)) if !sps.is_empty() && !pps.is_empty() => {
            Ok(H264Parameters { sps, pps })
        }
        _ => Err(SDPError::InvalidFormatParameter(format!(
            "incomplete sprop-parameter-sets: {}",
            value
        ))),
    }
}

fn digest_fmtp(media: &mut MediaDescription, fmtp: &FormatParameters) {
    if let Some(format) = media.formats.get_mut(&fmtp.fmt) {
        format.parameters = Some(fmtp.params.clone());
    }
    for (key, value) in fmtp.entries() {
        match key {
            "sprop-parameter-sets" => match parse_sprop_parameter_sets(value) {
                Ok(parameters) => media.h264_parameters = Some(parameters),
                Err(err) => tracing::warn!("ignoring malformed sprop-parameter-sets: {}", err),
            },
            "config" => match hex::decode(value) {
                Ok(config) => media.aac_config = Some(config),
                Err(err) => tracing::warn!("ignoring malformed aac config: {}", err),
            },
            _ => {}
        }
    }
}

impl From<&SDPMediaDescription> for MediaDescription {
    fn from(section: &SDPMediaDescription) -> Self {
        let mut media = MediaDescription {
            media_type: section.media_line.media_type.clone(),
            control: section.get_control().map(str::to_owned),
            formats: BTreeMap::new(),
            h264_parameters: None,
            aac_config: None,
        };
        for payload_type in &section.media_line.formats {
            media.formats.insert(
                *payload_type,
                RtpFormat {
                    payload_type: *payload_type,
                    ..Default::default()
                },
            );
        }
        for attribute in &section.attributes {
            match attribute {
                SDPAttribute::Rtpmap(rtpmap) => {
                    media.formats.insert(
                        rtpmap.payload_type,
                        RtpFormat {
                            payload_type: rtpmap.payload_type,
                            encoding_name: rtpmap.encoding_name.clone(),
                            clock_rate: rtpmap.clock_rate,
                            channels: rtpmap.encoding_params,
                            parameters: None,
                        },
                    );
                }
                SDPAttribute::Fmtp(fmtp) => digest_fmtp(&mut media, fmtp),
                _ => {}
            }
        }
        media
    }
}

impl Sdp {
    pub fn media_descriptions(&self) -> Vec<MediaDescription> {
        self.media_description.iter().map(Into::into).collect()
    }

    /// Builds an ANNOUNCE/DESCRIBE body from digested track descriptions,
    /// stamping `control:trackID=<n>` per section.
    pub fn from_media_descriptions(tracks: &[MediaDescription]) -> Self {
        let mut sdp = Sdp::default();
        for (index, track) in tracks.iter().enumerate() {
            let mut attributes = vec![SDPAttribute::Control(format!("trackID={}", index))];
            for format in track.formats.values() {
                attributes.push(SDPAttribute::Rtpmap(RtpMap {
                    payload_type: format.payload_type,
                    encoding_name: format.encoding_name.clone(),
                    clock_rate: format.clock_rate,
                    encoding_params: format.channels,
                }));
                if let Some(parameters) = &format.parameters {
                    attributes.push(SDPAttribute::Fmtp(FormatParameters {
                        fmt: format.payload_type,
                        params: parameters.clone(),
                    }));
                }
            }
            sdp.media_description.push(SDPMediaDescription {
                media_line: SDPMediaLine {
                    media_type: track.media_type.clone(),
                    port: 0,
                    protocol: "RTP/AVP".to_owned(),
                    formats: track.formats.keys().copied().collect(),
                },
                connection: None,
                attributes,
            });
        }
        sdp
    }
}
