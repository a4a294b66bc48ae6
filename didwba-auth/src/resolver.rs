//! DID resolution
//!
//! Documents are looked up in the local [`KeyStore`](crate::keystore::KeyStore)
//! first and fetched from the DID's own origin otherwise.

use crate::config::{RemoteScheme, ResolverConfig};
use crate::did::{DidDocument, WbaDid};
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resolves a DID to its document
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolve a DID, possibly from cache
    async fn resolve(&self, did: &str) -> Result<DidDocument>;

    /// Resolve a DID bypassing any cache
    ///
    /// Used after a signature failure so a rotated key is picked up.
    async fn resolve_fresh(&self, did: &str) -> Result<DidDocument> {
        self.resolve(did).await
    }
}

/// Fetches `did.json` from the origin embedded in the DID
#[derive(Debug, Clone)]
pub struct HttpDidResolver {
    client: reqwest::Client,
    scheme: RemoteScheme,
}

impl HttpDidResolver {
    /// Create a resolver
    pub fn new(scheme: RemoteScheme, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, scheme })
    }

    /// Create a resolver from configuration
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        Self::new(config.remote_scheme, config.request_timeout)
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        let wba = WbaDid::parse(did)?;
        let url = wba.document_url(self.scheme);
        tracing::debug!(%did, %url, "fetching DID document");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::UnresolvableDid(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AuthError::UnresolvableDid(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::UnresolvableDid(format!("{}: {}", url, e)))?;
        let document = DidDocument::from_json(raw)?;

        // A document is only trusted for the DID it names
        let fetched = WbaDid::parse(&document.did)?;
        if fetched != wba {
            return Err(AuthError::UnresolvableDid(format!(
                "{} served a document for {}",
                url, document.did
            )));
        }

        Ok(document)
    }
}

/// Local-then-remote resolver with a TTL cache for remote documents
pub struct CachingResolver {
    local: Arc<dyn DidResolver>,
    remote: Arc<dyn DidResolver>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (DidDocument, Instant)>>,
}

impl CachingResolver {
    /// Create a resolver over a local and a remote source
    pub fn new(local: Arc<dyn DidResolver>, remote: Arc<dyn DidResolver>, ttl: Duration) -> Self {
        Self {
            local,
            remote,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop a cached document
    pub fn invalidate(&self, did: &str) {
        self.cache.lock().remove(did);
    }

    /// Number of cached remote documents
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Insert a fetched document, sweeping expired entries first
    fn store(&self, did: &str, document: DidDocument) {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, (_, fetched_at)| fetched_at.elapsed() < self.ttl);
        if cache.len() < before {
            tracing::debug!(removed = before - cache.len(), "swept expired DID documents");
        }
        cache.insert(did.to_string(), (document, Instant::now()));
    }

    fn cached(&self, did: &str) -> Option<DidDocument> {
        let mut cache = self.cache.lock();
        match cache.get(did) {
            Some((doc, at)) if at.elapsed() < self.ttl => Some(doc.clone()),
            Some(_) => {
                cache.remove(did);
                None
            }
            None => None,
        }
    }

    async fn lookup(&self, did: &str) -> Result<DidDocument> {
        let local_err = match self.local.resolve(did).await {
            Ok(doc) => return Ok(doc),
            Err(e) => e,
        };

        match self.remote.resolve(did).await {
            Ok(doc) => {
                self.store(did, doc.clone());
                Ok(doc)
            }
            Err(remote_err) => {
                tracing::warn!(%did, local = %local_err, remote = %remote_err, "DID resolution failed");
                Err(AuthError::UnresolvableDid(format!(
                    "{} (local: {}; remote: {})",
                    did, local_err, remote_err
                )))
            }
        }
    }
}

#[async_trait]
impl DidResolver for CachingResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        if let Some(doc) = self.cached(did) {
            return Ok(doc);
        }
        self.lookup(did).await
    }

    async fn resolve_fresh(&self, did: &str) -> Result<DidDocument> {
        self.invalidate(did);
        self.lookup(did).await
    }
}
