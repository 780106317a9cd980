//! The `Range` header, minimal `npt=<start>-[<end>]` form. Anything else
//! passes through untouched.

use std::{fmt, str::FromStr};

use crate::errors::RtspMessageError;

#[derive(Debug, Clone, PartialEq)]
pub enum RangeHeader {
    Npt { start: f64, end: Option<f64> },
    Other(String),
}

impl RangeHeader {
    pub fn npt_from_start() -> Self {
        Self::Npt {
            start: 0.0,
            end: None,
        }
    }
}

impl fmt::Display for RangeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npt { start, end } => {
                write!(f, "npt={}-", start)?;
                if let Some(end) = end {
                    write!(f, "{}", end)?;
                }
                Ok(())
            }
            Self::Other(value) => f.write_str(value),
        }
    }
}

impl FromStr for RangeHeader {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RtspMessageError::InvalidRtspMessageFormat(
                "empty range header".to_owned(),
            ));
        }
        let Some(npt) = trimmed.strip_prefix("npt=") else {
            return Ok(Self::Other(trimmed.to_owned()));
        };
        let Some((start, end)) = npt.split_once('-') else {
            return Ok(Self::Other(trimmed.to_owned()));
        };
        let Ok(start) = start.trim().parse::<f64>() else {
            // npt also allows "now" and hh:mm:ss forms, carried verbatim
            return Ok(Self::Other(trimmed.to_owned()));
        };
        let end = match end.trim() {
            "" => None,
            end => match end.parse::<f64>() {
                Ok(end) => Some(end),
                Err(_) => return Ok(Self::Other(trimmed.to_owned())),
            },
        };
        Ok(Self::Npt { start, end })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_ended_npt_round_trip() {
        let parsed: RangeHeader = "npt=3.52-".parse().unwrap();
        assert_eq!(
            parsed,
            RangeHeader::Npt {
                start: 3.52,
                end: None
            }
        );
        assert_eq!(parsed.to_string(), "npt=3.52-");
    }

    #[test]
    fn bounded_npt_round_trip() {
        let parsed: RangeHeader = "npt=0-7.741".parse().unwrap();
        assert_eq!(
            parsed,
            RangeHeader::Npt {
                start: 0.0,
                end: Some(7.741)
            }
        );
        let reparsed: RangeHeader = parsed.to_string().parse().unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn from_start_helper() {
        assert_eq!(RangeHeader::npt_from_start().to_string(), "npt=0-");
    }

    #[test]
    fn unknown_forms_pass_through() {
        for text in [
            "npt=now-",
            "clock=19961108T143720.25Z-",
            "smpte=10:12:33:20-",
        ] {
            let parsed: RangeHeader = text.parse().unwrap();
            assert_eq!(parsed, RangeHeader::Other(text.to_owned()));
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn empty_value_rejected() {
        assert!("".parse::<RangeHeader>().is_err());
    }
}
