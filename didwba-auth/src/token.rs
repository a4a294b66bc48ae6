//! Bearer token issuance and lookup
//!
//! Every local agent owns one [`TokenManager`] with two tables: tokens it
//! issued to callers, keyed by holder DID, and tokens it received from
//! other agents, keyed by issuer DID. Records are never deleted; revoked and
//! expired entries stay inert until the process exits.
//!
//! Issued tokens are HS256 JWTs signed with the agent's token secret, so a
//! token with no stored record can still be checked against its claims.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Length of a generated token secret
pub const TOKEN_SECRET_BYTES: usize = 32;

/// Bearer token record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token string as presented on the wire
    pub token: String,

    /// DID of the issuing agent
    pub issuer_did: String,

    /// DID the token authenticates
    pub holder_did: String,

    /// Issue time
    #[serde(with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,

    /// Expiry time
    #[serde(with = "utc_timestamp")]
    pub expires_at: DateTime<Utc>,

    /// Set by revocation
    #[serde(default)]
    pub is_revoked: bool,
}

impl Token {
    /// Check expiry at a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check whether the token may still be presented
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }

    /// Seconds until expiry, zero once expired
    pub fn expires_in_at(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// Claims carried by issued tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Holder DID
    pub req_did: String,
    /// Issuer DID
    pub resp_did: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
}

/// Per-agent token tables
pub struct TokenManager {
    issuer_did: String,
    secret: Vec<u8>,
    issued: Mutex<HashMap<String, Token>>,
    received: Mutex<HashMap<String, Token>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("issuer_did", &self.issuer_did)
            .field("issued", &self.issued.lock().len())
            .field("received", &self.received.lock().len())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager signing with the given secret
    pub fn new(issuer_did: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            issuer_did: issuer_did.into(),
            secret,
            issued: Mutex::new(HashMap::new()),
            received: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager with a random secret
    pub fn with_random_secret(issuer_did: impl Into<String>) -> Self {
        let mut secret = vec![0u8; TOKEN_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(issuer_did, secret)
    }

    /// DID of the owning agent
    pub fn issuer_did(&self) -> &str {
        &self.issuer_did
    }

    /// Issue a token to a holder, superseding any previous one
    pub fn issue(&self, holder_did: &str, ttl: Duration) -> Result<Token> {
        self.issue_at(holder_did, ttl, Utc::now())
    }

    /// [`issue`](Self::issue) at an explicit instant
    pub fn issue_at(&self, holder_did: &str, ttl: Duration, now: DateTime<Utc>) -> Result<Token> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::Config(format!("token ttl out of range: {}", e)))?;
        let expires_at = now + ttl;

        let claims = TokenClaims {
            req_did: holder_did.to_string(),
            resp_did: self.issuer_did.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )?;

        let record = Token {
            token,
            issuer_did: self.issuer_did.clone(),
            holder_did: holder_did.to_string(),
            created_at: now,
            expires_at,
            is_revoked: false,
        };

        self.issued
            .lock()
            .insert(holder_did.to_string(), record.clone());

        tracing::info!(
            issuer = %self.issuer_did,
            holder = %holder_did,
            token = %fingerprint(&record.token),
            expires_at = %record.expires_at,
            "issued bearer token"
        );

        Ok(record)
    }

    /// Verify a presented token for a claimed holder
    pub fn verify(&self, token: &str, holder_did: &str) -> Result<Token> {
        self.verify_at(token, holder_did, Utc::now())
    }

    /// [`verify`](Self::verify) at an explicit instant
    pub fn verify_at(&self, token: &str, holder_did: &str, now: DateTime<Utc>) -> Result<Token> {
        let stored = self.issued.lock().get(holder_did).cloned();

        let Some(record) = stored else {
            return self.verify_claims(token, holder_did, now);
        };

        if record.is_revoked {
            return Err(AuthError::TokenRevoked(holder_did.to_string()));
        }
        if record.is_expired_at(now) {
            return Err(AuthError::TokenExpired(holder_did.to_string()));
        }
        if record.token != token {
            return Err(AuthError::TokenMismatch(holder_did.to_string()));
        }

        Ok(record)
    }

    /// Holder named by a token this agent signed, expired or not
    pub fn holder_of(&self, token: &str) -> Option<String> {
        self.decode_claims(token)
            .ok()
            .filter(|claims| claims.resp_did == self.issuer_did)
            .map(|claims| claims.req_did)
    }

    fn decode_claims(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )?;
        Ok(data.claims)
    }

    // Fallback for tokens without a stored record
    fn verify_claims(&self, token: &str, holder_did: &str, now: DateTime<Utc>) -> Result<Token> {
        let claims = self
            .decode_claims(token)
            .map_err(|_| AuthError::TokenNotFound(holder_did.to_string()))?;

        if claims.req_did != holder_did || claims.resp_did != self.issuer_did {
            return Err(AuthError::TokenMismatch(holder_did.to_string()));
        }

        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::TokenNotFound(holder_did.to_string()))?;
        if now >= expires_at {
            return Err(AuthError::TokenExpired(holder_did.to_string()));
        }

        tracing::debug!(holder = %holder_did, "token accepted from its claims");

        Ok(Token {
            token: token.to_string(),
            issuer_did: claims.resp_did,
            holder_did: claims.req_did,
            created_at: DateTime::from_timestamp(claims.iat, 0).unwrap_or(now),
            expires_at,
            is_revoked: false,
        })
    }

    /// Revoke the token issued to a holder
    ///
    /// Returns `false` when no token was issued to it.
    pub fn revoke(&self, holder_did: &str) -> bool {
        match self.issued.lock().get_mut(holder_did) {
            Some(record) => {
                record.is_revoked = true;
                tracing::info!(issuer = %self.issuer_did, holder = %holder_did, "revoked bearer token");
                true
            }
            None => false,
        }
    }

    /// Token issued to a holder, in any state
    pub fn issued_token(&self, holder_did: &str) -> Option<Token> {
        self.issued.lock().get(holder_did).cloned()
    }

    /// All issued records, sorted by holder
    pub fn issued_snapshot(&self) -> Vec<Token> {
        let mut records: Vec<Token> = self.issued.lock().values().cloned().collect();
        records.sort_by(|a, b| a.holder_did.cmp(&b.holder_did));
        records
    }

    /// Load issued records, replacing records for the same holders
    pub fn import_issued(&self, records: impl IntoIterator<Item = Token>) {
        let mut issued = self.issued.lock();
        for record in records {
            issued.insert(record.holder_did.clone(), record);
        }
    }

    /// Remember a token received from another agent
    pub fn store_received(
        &self,
        issuer_did: &str,
        token: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Token {
        let record = Token {
            token: token.into(),
            issuer_did: issuer_did.to_string(),
            holder_did: self.issuer_did.clone(),
            created_at,
            expires_at,
            is_revoked: false,
        };

        tracing::debug!(
            issuer = %issuer_did,
            token = %fingerprint(&record.token),
            "stored received token"
        );

        self.received
            .lock()
            .insert(issuer_did.to_string(), record.clone());
        record
    }

    /// Usable token received from an issuer
    pub fn received_token(&self, issuer_did: &str) -> Option<Token> {
        self.received_token_at(issuer_did, Utc::now())
    }

    /// [`received_token`](Self::received_token) at an explicit instant
    pub fn received_token_at(&self, issuer_did: &str, now: DateTime<Utc>) -> Option<Token> {
        self.received
            .lock()
            .get(issuer_did)
            .filter(|record| record.is_usable_at(now))
            .cloned()
    }

    /// Mark the token received from an issuer unusable
    ///
    /// Returns `false` when no token was stored.
    pub fn clear_received(&self, issuer_did: &str) -> bool {
        match self.received.lock().get_mut(issuer_did) {
            Some(record) => {
                record.is_revoked = true;
                true
            }
            None => false,
        }
    }
}

/// Short, non-reversible token identifier for logs
pub fn fingerprint(token: &str) -> String {
    hex::encode(&Sha256::digest(token.as_bytes())[..4])
}

/// Serde for timestamps that may arrive without an offset
///
/// Offset-less values are taken as UTC.
mod utc_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;

        if let Ok(aware) = DateTime::parse_from_rfc3339(&value) {
            return Ok(aware.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
