//! # didwba-auth: DID-WBA Mutual Authentication
//!
//! This crate implements DID-WBA, the `did:wba` challenge-response protocol
//! agents use to prove their identity to each other over HTTP, followed by
//! bearer-token sessions.
//!
//! ## Features
//!
//! - **DID documents**: `did:wba` identifiers, Ed25519 verification methods, credential bundles on disk
//! - **Resolution**: local key store first, the DID's own origin second, bounded cache
//! - **Two-way proofs**: the called agent signs a proof of its own identity back to the caller
//! - **Replay protection**: per-process nonce store with a configurable window
//! - **Bearer tokens**: per-agent issued/received tables with revocation and expiry
//! - **actix-web integration**: path exemptions and a `from_fn` middleware
//!
//! ## Handshake
//!
//! ```text
//! ┌──────────────────────┐   Authorization: DIDWba did=.., nonce=.., signature=..   ┌──────────────────────┐
//! │  AGENT A (caller)    │ ───────────────────────────────────────────────────────▶ │  AGENT B (target)    │
//! │  AuthenticationClient│                                                          │  AuthMiddleware      │
//! │                      │                                                          │  AuthenticationServer│
//! │  verifies B's proof, │ ◀─────────────────────────────────────────────────────── │  timestamp, nonce,   │
//! │  caches the token    │   Authorization: {access_token, resp_did_auth_header}    │  resolve, verify     │
//! └──────────────────────┘                                                          └──────────────────────┘
//!             │                    Authorization: Bearer <token>                              ▲
//!             └───────────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod client;
pub mod config;
pub mod context;
pub mod did;
pub mod error;
pub mod header;
pub mod keystore;
pub mod middleware;
pub mod nonce;
pub mod resolver;
pub mod server;
pub mod signer;
pub mod token;

// Re-exports for convenience
pub use agent::{AgentRegistry, InMemoryAgentRegistry, LocalAgent};
pub use client::{AuthenticationClient, ClientResponse, OutgoingAuth};
pub use config::AuthConfig;
pub use context::AuthenticationContext;
pub use did::{DidCredentials, DidDocument, DidKeyPair, WbaDid};
pub use error::{AuthError, Result};
pub use header::{AuthHeaderParts, AuthorizationKind};
pub use keystore::KeyStore;
pub use middleware::{did_wba_guard, AuthMiddleware, AuthenticatedIdentity, ExemptPaths};
pub use nonce::{generate_nonce, InMemoryNonceStore, NonceStore};
pub use resolver::{CachingResolver, DidResolver, HttpDidResolver};
pub use server::{AuthOutcome, AuthRequest, AuthResponse, AuthenticationServer};
pub use token::{Token, TokenManager};

/// Protocol name
pub const DIDWBA_PROTOCOL: &str = "DID-WBA";

/// Authorization scheme of DID-signature headers
pub const DIDWBA_SCHEME: &str = header::DIDWBA_SCHEME;

/// Default replay window and timestamp freshness (5 minutes)
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Default bearer token lifetime (60 minutes)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
