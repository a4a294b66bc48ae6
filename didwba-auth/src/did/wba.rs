//! `did:wba` identifiers
//!
//! A `did:wba` DID embeds the HTTP origin of its document:
//! `did:wba:<host>[%3A<port>]:<segment>:...`.

use crate::config::RemoteScheme;
use crate::error::{AuthError, Result};
use std::fmt;

/// Method prefix
pub const DID_WBA_PREFIX: &str = "did:wba:";

/// Parsed `did:wba` identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbaDid {
    /// Host name
    pub host: String,
    /// Optional port
    pub port: Option<u16>,
    /// Path segments after the origin
    pub path_segments: Vec<String>,
}

impl WbaDid {
    /// Create an identifier from its parts
    pub fn new(host: impl Into<String>, port: Option<u16>, path_segments: Vec<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path_segments,
        }
    }

    /// Parse a DID string
    ///
    /// Accepts the escaped `host%3Aport` form and the legacy `host:port` form
    /// where the second segment is numeric.
    pub fn parse(did: &str) -> Result<Self> {
        let rest = did
            .strip_prefix(DID_WBA_PREFIX)
            .ok_or_else(|| AuthError::UnresolvableDid(format!("not a did:wba DID: {}", did)))?;

        let mut segments = rest.split(':');
        let authority = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::UnresolvableDid(format!("missing host in {}", did)))?;

        let mut rest: Vec<String> = segments.map(|s| s.to_string()).collect();

        let (host, port) = match split_escaped_port(authority) {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => {
                // Legacy unescaped form: did:wba:host:9000:path
                let legacy_port = rest.first().and_then(|s| s.parse::<u16>().ok());
                if legacy_port.is_some() {
                    rest.remove(0);
                }
                (authority.to_string(), legacy_port)
            }
        };

        if host.is_empty() || host.contains('/') {
            return Err(AuthError::UnresolvableDid(format!("invalid host in {}", did)));
        }
        if rest.iter().any(|s| s.is_empty()) {
            return Err(AuthError::UnresolvableDid(format!(
                "empty path segment in {}",
                did
            )));
        }

        Ok(Self {
            host,
            port,
            path_segments: rest,
        })
    }

    /// URL of the published DID document
    pub fn document_url(&self, scheme: RemoteScheme) -> String {
        let origin = match self.port {
            Some(port) => format!("{}://{}:{}", scheme.as_str(), self.host, port),
            None => format!("{}://{}", scheme.as_str(), self.host),
        };

        if self.path_segments.is_empty() {
            format!("{}/.well-known/did.json", origin)
        } else {
            format!("{}/{}/did.json", origin, self.path_segments.join("/"))
        }
    }
}

impl fmt::Display for WbaDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DID_WBA_PREFIX, self.host)?;
        if let Some(port) = self.port {
            write!(f, "%3A{}", port)?;
        }
        for segment in &self.path_segments {
            write!(f, ":{}", segment)?;
        }
        Ok(())
    }
}

fn split_escaped_port(authority: &str) -> Option<(&str, u16)> {
    let lower = authority.to_ascii_lowercase();
    let idx = lower.find("%3a")?;
    let port = authority[idx + 3..].parse::<u16>().ok()?;
    Some((&authority[..idx], port))
}

/// Host part of a DID, used as the domain a reciprocal proof is bound to
pub fn did_host(did: &str) -> Result<String> {
    Ok(WbaDid::parse(did)?.host)
}
