//! DID identifiers, documents and key material

pub mod document;
pub mod keys;
pub mod wba;

pub use document::{DidDocument, PublicKeyJwk, ServiceEndpoint, VerificationMethod};
pub use keys::{DidCredentials, DidKeyPair, DEFAULT_KEY_ID, DID_DOCUMENT_FILE_NAME};
pub use wba::{did_host, WbaDid, DID_WBA_PREFIX};
