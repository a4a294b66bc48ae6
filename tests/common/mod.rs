//! Common test utilities shared across integration and E2E tests

use didwba_auth::{
    AuthConfig, AuthenticationClient, AuthenticationServer, DidCredentials, DidResolver,
    InMemoryAgentRegistry, InMemoryNonceStore, KeyStore, LocalAgent,
};
use std::sync::Arc;

/// An agent together with the key store and registry of the host running it
pub struct Peer {
    pub agent: Arc<LocalAgent>,
    pub store: Arc<KeyStore>,
    pub registry: Arc<InMemoryAgentRegistry>,
}

impl Peer {
    /// Generate a fresh agent `did:wba:<host>%3A<port>:wba:user:<id>`
    pub fn generate(host: &str, port: u16, id: &str) -> Self {
        let credentials = DidCredentials::generate(host, Some(port), &["wba", "user", id])
            .expect("Failed to generate credentials");
        Self::hosting(credentials)
    }

    /// Host existing credentials
    pub fn hosting(credentials: DidCredentials) -> Self {
        let store = Arc::new(KeyStore::new());
        let registry = Arc::new(InMemoryAgentRegistry::new());
        let agent = registry.register(LocalAgent::new(store.insert(credentials)));

        Self {
            agent,
            store,
            registry,
        }
    }

    pub fn did(&self) -> &str {
        self.agent.did()
    }

    /// Server verifying requests addressed to this peer
    pub fn server(&self, config: &AuthConfig) -> Arc<AuthenticationServer> {
        self.server_with(config, self.store.clone())
    }

    /// Server with a custom resolver
    pub fn server_with(
        &self,
        config: &AuthConfig,
        resolver: Arc<dyn DidResolver>,
    ) -> Arc<AuthenticationServer> {
        Arc::new(AuthenticationServer::new(
            config,
            resolver,
            Arc::new(InMemoryNonceStore::new(config.nonce_replay_window)),
            self.registry.clone(),
        ))
    }

    /// Client calling out as this peer
    pub fn client(&self, config: &AuthConfig) -> AuthenticationClient {
        AuthenticationClient::new(self.agent.clone(), self.store.clone(), config)
            .expect("Failed to build client")
    }
}

/// Make two peers resolvable to each other without network access
pub fn introduce(a: &Peer, b: &Peer) {
    a.store.deposit_document(b.agent.document().clone());
    b.store.deposit_document(a.agent.document().clone());
}

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
