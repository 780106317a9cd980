//! The `Session` header, id plus optional `;timeout=` seconds.

use std::{fmt, str::FromStr};

use crate::errors::RtspMessageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    pub timeout: Option<u64>,
}

impl SessionHeader {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

impl fmt::Display for SessionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)?;
        if let Some(timeout) = self.timeout {
            write!(f, ";timeout={}", timeout)?;
        }
        Ok(())
    }
}

impl FromStr for SessionHeader {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        let id = parts
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RtspMessageError::InvalidRtspMessageFormat("empty session header".to_owned())
            })?;
        let mut timeout = None;
        for param in parts {
            if let Some((k, v)) = param.split_once('=')
                && k.trim() == "timeout"
            {
                timeout = v.trim().parse().ok();
            }
        }
        Ok(Self {
            id: id.to_owned(),
            timeout,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_id() {
        let parsed: SessionHeader = "ULExwZCXh2pd0xuF".parse().unwrap();
        assert_eq!(parsed.id, "ULExwZCXh2pd0xuF");
        assert_eq!(parsed.timeout, None);
    }

    #[test]
    fn id_with_timeout() {
        let parsed: SessionHeader = "abcdef0123456789;timeout=60".parse().unwrap();
        assert_eq!(parsed.timeout, Some(60));
        assert_eq!(parsed.to_string(), "abcdef0123456789;timeout=60");
    }
}
