//! Per-call authentication context

use crate::error::{AuthError, Result};
use crate::nonce::generate_nonce;
use chrono::{DateTime, SecondsFormat, Utc};

/// State of one outgoing or incoming authenticated call
///
/// Created fresh for every call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationContext {
    /// DID making the call
    pub caller_did: String,
    /// DID being called
    pub target_did: String,
    /// Full request URL
    pub request_url: String,
    /// HTTP method
    pub http_method: String,
    /// Time of the call
    pub timestamp: DateTime<Utc>,
    /// Per-call nonce
    pub nonce: String,
    /// Whether the counterparty must prove its identity back
    pub use_two_way_auth: bool,
    /// Host the signature is bound to
    pub domain: String,
}

impl AuthenticationContext {
    /// Create a context for a call, with a fresh nonce and timestamp
    pub fn new(
        caller_did: impl Into<String>,
        target_did: impl Into<String>,
        request_url: impl Into<String>,
        http_method: impl Into<String>,
        use_two_way_auth: bool,
    ) -> Result<Self> {
        let request_url = request_url.into();
        let domain = domain_of(&request_url)?;

        Ok(Self {
            caller_did: caller_did.into(),
            target_did: target_did.into(),
            request_url,
            http_method: http_method.into().to_ascii_uppercase(),
            timestamp: Utc::now(),
            nonce: generate_nonce(),
            use_two_way_auth,
            domain,
        })
    }

    /// Create a context bound to an explicit domain rather than a URL
    pub fn for_domain(
        caller_did: impl Into<String>,
        target_did: impl Into<String>,
        domain: impl Into<String>,
        use_two_way_auth: bool,
    ) -> Self {
        let domain = domain.into();
        Self {
            caller_did: caller_did.into(),
            target_did: target_did.into(),
            request_url: String::new(),
            http_method: String::new(),
            timestamp: Utc::now(),
            nonce: generate_nonce(),
            use_two_way_auth,
            domain,
        }
    }

    /// Timestamp in wire form, second precision
    pub fn timestamp_string(&self) -> String {
        format_timestamp(self.timestamp)
    }

    /// Counterparty DID when two-way auth is requested
    pub fn resp_did(&self) -> Option<&str> {
        self.use_two_way_auth.then_some(self.target_did.as_str())
    }
}

/// Host component of a URL
pub fn domain_of(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| AuthError::InternalError(format!("invalid request URL {}: {}", url, e)))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| AuthError::InternalError(format!("request URL {} has no host", url)))
}

/// Format a timestamp as RFC 3339 UTC with second precision
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a wire timestamp
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| AuthError::MalformedHeader(format!("invalid timestamp {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_context_from_url() {
        let ctx = AuthenticationContext::new(
            "did:wba:a.example%3A9000:wba:user:1111",
            "did:wba:b.example%3A9001:wba:user:2222",
            "http://b.example:9001/wba/auth",
            "get",
            true,
        )
        .unwrap();

        assert_eq!(ctx.domain, "b.example");
        assert_eq!(ctx.http_method, "GET");
        assert_eq!(ctx.resp_did(), Some("did:wba:b.example%3A9001:wba:user:2222"));
        assert_eq!(ctx.nonce.len(), 32);
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(AuthenticationContext::new("a", "b", "not a url", "GET", false).is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(ts), "2026-03-04T05:06:07Z");
        assert_eq!(parse_timestamp("2026-03-04T05:06:07Z").unwrap(), ts);
        assert_eq!(parse_timestamp("2026-03-04T07:06:07+02:00").unwrap(), ts);
        assert_eq!(parse_timestamp("2026-03-04T05:06:07").unwrap(), ts);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
