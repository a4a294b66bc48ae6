//! Local Agents
//!
//! A local agent is an identity hosted by this process: its credentials and
//! the token tables it uses as issuer and as holder.

use crate::did::{DidCredentials, DidDocument, DidKeyPair};
use crate::error::{AuthError, Result};
use crate::keystore::KeyStore;
use crate::token::TokenManager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity hosted by this process
#[derive(Debug)]
pub struct LocalAgent {
    credentials: Arc<DidCredentials>,
    tokens: TokenManager,
}

impl LocalAgent {
    /// Create an agent with a random token secret
    pub fn new(credentials: Arc<DidCredentials>) -> Self {
        let tokens = TokenManager::with_random_secret(credentials.did());
        Self {
            credentials,
            tokens,
        }
    }

    /// Create an agent with an explicit token secret
    pub fn with_token_secret(credentials: Arc<DidCredentials>, secret: Vec<u8>) -> Self {
        let tokens = TokenManager::new(credentials.did(), secret);
        Self {
            credentials,
            tokens,
        }
    }

    /// DID
    pub fn did(&self) -> &str {
        self.credentials.did()
    }

    /// DID document
    pub fn document(&self) -> &DidDocument {
        self.credentials.document()
    }

    /// Credentials
    pub fn credentials(&self) -> &DidCredentials {
        &self.credentials
    }

    /// Key used to sign outgoing proofs
    pub fn signing_key(&self) -> &DidKeyPair {
        self.credentials.signing_key()
    }

    /// Token tables
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}

/// Lookup of local agents by DID
pub trait AgentRegistry: Send + Sync {
    /// Agent hosted under a DID
    fn agent(&self, did: &str) -> Option<Arc<LocalAgent>>;

    /// Agent answering requests that name no target
    fn default_agent(&self) -> Option<Arc<LocalAgent>>;

    /// Agent hosted under a DID, failing for unknown DIDs
    fn require(&self, did: &str) -> Result<Arc<LocalAgent>> {
        self.agent(did)
            .ok_or_else(|| AuthError::UnresolvableDid(format!("{} is not hosted here", did)))
    }
}

/// In-memory agent registry
#[derive(Debug, Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<String, Arc<LocalAgent>>>,
    default_did: RwLock<Option<String>>,
}

impl InMemoryAgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one agent per credential bundle of a key store
    ///
    /// The first DID in sorted order becomes the default agent.
    pub fn from_keystore(store: &KeyStore) -> Self {
        let registry = Self::new();
        for did in store.dids() {
            if let Some(credentials) = store.credentials(&did) {
                registry.register(LocalAgent::new(credentials));
            }
        }
        registry
    }

    /// Add an agent; the first one registered becomes the default
    pub fn register(&self, agent: LocalAgent) -> Arc<LocalAgent> {
        let agent = Arc::new(agent);
        let did = agent.did().to_string();

        self.agents.write().insert(did.clone(), agent.clone());
        self.default_did.write().get_or_insert(did.clone());

        tracing::debug!(%did, "registered local agent");
        agent
    }

    /// Choose the default agent
    pub fn set_default(&self, did: &str) -> Result<()> {
        if !self.agents.read().contains_key(did) {
            return Err(AuthError::UnresolvableDid(format!("{} is not hosted here", did)));
        }
        *self.default_did.write() = Some(did.to_string());
        Ok(())
    }

    /// All hosted agents
    pub fn agents(&self) -> Vec<Arc<LocalAgent>> {
        let mut agents: Vec<Arc<LocalAgent>> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.did().cmp(b.did()));
        agents
    }
}

impl AgentRegistry for InMemoryAgentRegistry {
    fn agent(&self, did: &str) -> Option<Arc<LocalAgent>> {
        self.agents.read().get(did).cloned()
    }

    fn default_agent(&self) -> Option<Arc<LocalAgent>> {
        let did = self.default_did.read().clone()?;
        self.agent(&did)
    }
}
