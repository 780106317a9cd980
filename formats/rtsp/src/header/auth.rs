//! `WWW-Authenticate` / `Authorization` header values, RFC 2617 / RFC 7616.

use std::{fmt, str::FromStr};

use base64::Engine;

use crate::{
    errors::RtspMessageError,
    util::{split_comma_params, unquote},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl fmt::Display for AuthAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "MD5"),
            Self::Sha256 => write!(f, "SHA-256"),
        }
    }
}

impl FromStr for AuthAlgorithm {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA-256" => Ok(Self::Sha256),
            other => Err(RtspMessageError::InvalidAuthenticateHeader(format!(
                "unknown digest algorithm: {}",
                other
            ))),
        }
    }
}

/// A single `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WwwAuthenticate {
    Basic {
        realm: Option<String>,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
        algorithm: Option<AuthAlgorithm>,
    },
}

impl FromStr for WwwAuthenticate {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, params) = s.split_once(' ').unwrap_or((s, ""));
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        for param in split_comma_params(params) {
            let (k, v) = param.split_once('=').unwrap_or((param, ""));
            match k.trim() {
                "realm" => realm = Some(unquote(v).to_owned()),
                "nonce" => nonce = Some(unquote(v).to_owned()),
                "opaque" => opaque = Some(unquote(v).to_owned()),
                "algorithm" => algorithm = Some(unquote(v).parse()?),
                _ => {}
            }
        }
        match scheme.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic { realm }),
            "digest" => Ok(Self::Digest {
                realm: realm.ok_or_else(|| {
                    RtspMessageError::InvalidAuthenticateHeader(
                        "digest challenge without realm".to_owned(),
                    )
                })?,
                nonce: nonce.ok_or_else(|| {
                    RtspMessageError::InvalidAuthenticateHeader(
                        "digest challenge without nonce".to_owned(),
                    )
                })?,
                opaque,
                algorithm,
            }),
            other => Err(RtspMessageError::InvalidAuthenticateHeader(format!(
                "unknown authentication scheme: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for WwwAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { realm } => {
                write!(f, "Basic")?;
                if let Some(realm) = realm {
                    write!(f, " realm=\"{}\"", realm)?;
                }
                Ok(())
            }
            Self::Digest {
                realm,
                nonce,
                opaque,
                algorithm,
            } => {
                write!(f, "Digest realm=\"{}\", nonce=\"{}\"", realm, nonce)?;
                if let Some(opaque) = opaque {
                    write!(f, ", opaque=\"{}\"", opaque)?;
                }
                if let Some(algorithm) = algorithm {
                    write!(f, ", algorithm={}", algorithm)?;
                }
                Ok(())
            }
        }
    }
}

/// An `Authorization` header value produced by clients and verified by
/// servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationHeader {
    Basic {
        credentials: String,
    },
    Digest {
        username: String,
        realm: String,
        nonce: String,
        uri: String,
        response: String,
        opaque: Option<String>,
        algorithm: Option<AuthAlgorithm>,
    },
}

impl AuthorizationHeader {
    pub fn basic(user: &str, pass: &str) -> Self {
        Self::Basic {
            credentials: base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", user, pass)),
        }
    }

    pub fn basic_credentials(&self) -> Option<(String, String)> {
        let Self::Basic { credentials } = self else {
            return None;
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(credentials)
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        decoded
            .split_once(':')
            .map(|(u, p)| (u.to_owned(), p.to_owned()))
    }
}

impl FromStr for AuthorizationHeader {
    type Err = RtspMessageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, params) = s.split_once(' ').unwrap_or((s, ""));
        match scheme.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic {
                credentials: params.trim().to_owned(),
            }),
            "digest" => {
                let mut username = None;
                let mut realm = None;
                let mut nonce = None;
                let mut uri = None;
                let mut response = None;
                let mut opaque = None;
                let mut algorithm = None;
                for param in split_comma_params(params) {
                    let (k, v) = param.split_once('=').unwrap_or((param, ""));
                    match k.trim() {
                        "username" => username = Some(unquote(v).to_owned()),
                        "realm" => realm = Some(unquote(v).to_owned()),
                        "nonce" => nonce = Some(unquote(v).to_owned()),
                        "uri" => uri = Some(unquote(v).to_owned()),
                        "response" => response = Some(unquote(v).to_owned()),
                        "opaque" => opaque = Some(unquote(v).to_owned()),
                        "algorithm" => algorithm = Some(unquote(v).parse()?),
                        _ => {}
                    }
                }
                let missing = |field: &str| {
                    RtspMessageError::InvalidAuthenticateHeader(format!(
                        "digest authorization without {}",
                        field
                    ))
                };
                Ok(Self::Digest {
                    username: username.ok_or_else(|| missing("username"))?,
                    realm: realm.ok_or_else(|| missing("realm"))?,
                    nonce: nonce.ok_or_else(|| missing("nonce"))?,
                    uri: uri.ok_or_else(|| missing("uri"))?,
                    response: response.ok_or_else(|| missing("response"))?,
                    opaque,
                    algorithm,
                })
            }
            other => Err(RtspMessageError::InvalidAuthenticateHeader(format!(
                "unknown authorization scheme: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { credentials } => write!(f, "Basic {}", credentials),
            Self::Digest {
                username,
                realm,
                nonce,
                uri,
                response,
                opaque,
                algorithm,
            } => {
                write!(
                    f,
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                    username, realm, nonce, uri, response
                )?;
                if let Some(opaque) = opaque {
                    write!(f, ", opaque=\"{}\"", opaque)?;
                }
                if let Some(algorithm) = algorithm {
                    write!(f, ", algorithm={}", algorithm)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_challenge_round_trip() {
        let text = "Digest realm=\"IPCam\", nonce=\"abc\"";
        let parsed: WwwAuthenticate = text.parse().unwrap();
        assert_eq!(
            parsed,
            WwwAuthenticate::Digest {
                realm: "IPCam".to_owned(),
                nonce: "abc".to_owned(),
                opaque: None,
                algorithm: None,
            }
        );
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn digest_challenge_with_algorithm() {
        let parsed: WwwAuthenticate =
            "Digest realm=\"r\", nonce=\"n\", algorithm=SHA-256".parse().unwrap();
        let WwwAuthenticate::Digest { algorithm, .. } = parsed else {
            panic!("expected digest");
        };
        assert_eq!(algorithm, Some(AuthAlgorithm::Sha256));
    }

    #[test]
    fn basic_credentials_round_trip() {
        let header = AuthorizationHeader::basic("myuser", "mypass");
        assert_eq!(header.to_string(), "Basic bXl1c2VyOm15cGFzcw==");
        let (user, pass) = header.basic_credentials().unwrap();
        assert_eq!(user, "myuser");
        assert_eq!(pass, "mypass");
    }

    #[test]
    fn digest_authorization_round_trip() {
        let text = "Digest username=\"myuser\", realm=\"IPCam\", nonce=\"abc\", \
                    uri=\"rtsp://localhost:8554/teststream\", response=\"0123456789abcdef\"";
        let parsed: AuthorizationHeader = text.parse().unwrap();
        let AuthorizationHeader::Digest {
            ref username,
            ref nonce,
            ..
        } = parsed
        else {
            panic!("expected digest");
        };
        assert_eq!(username, "myuser");
        assert_eq!(nonce, "abc");
        let reparsed: AuthorizationHeader = parsed.to_string().parse().unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn quoted_commas_survive() {
        let parsed: WwwAuthenticate =
            "Digest realm=\"a, b\", nonce=\"n\"".parse().unwrap();
        let WwwAuthenticate::Digest { realm, .. } = parsed else {
            panic!("expected digest");
        };
        assert_eq!(realm, "a, b");
    }
}
