//! Replay protection
//!
//! A nonce is accepted once. It is remembered for the replay window and at
//! least as long as the header carrying it can still pass the timestamp check.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::time::Duration;

/// Number of random bytes in a generated nonce
pub const NONCE_BYTES: usize = 16;

/// Record of nonces seen within the replay window
pub trait NonceStore: Send + Sync {
    /// Accept a nonce the first time it is seen, reject it afterwards
    ///
    /// `valid_until` is the last instant the presenting header is fresh; the
    /// nonce must stay recorded at least until then. Check and record happen
    /// atomically.
    fn check_and_record(&self, nonce: &str, valid_until: DateTime<Utc>) -> bool;
}

/// Generate a fresh hex-encoded nonce
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mutex-guarded in-memory nonce store
///
/// Expired entries are swept lazily on access.
#[derive(Debug)]
pub struct InMemoryNonceStore {
    window: chrono::Duration,
    state: Mutex<NonceState>,
}

#[derive(Debug)]
struct NonceState {
    /// Nonce to the instant it may be forgotten
    seen: HashMap<String, DateTime<Utc>>,
    last_sweep: DateTime<Utc>,
}

impl InMemoryNonceStore {
    /// Create a store with the given replay window
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            state: Mutex::new(NonceState {
                seen: HashMap::new(),
                last_sweep: Utc::now(),
            }),
        }
    }

    /// Replay window
    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(Duration::MAX)
    }

    /// [`NonceStore::check_and_record`] at an explicit instant
    pub fn check_and_record_at(
        &self,
        nonce: &str,
        valid_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock();

        if now - state.last_sweep >= self.window {
            let before = state.seen.len();
            state.seen.retain(|_, expires_at| now <= *expires_at);
            state.last_sweep = now;
            tracing::debug!(removed = before - state.seen.len(), "swept expired nonces");
        }

        match state.seen.get(nonce) {
            Some(expires_at) if now <= *expires_at => false,
            _ => {
                let expires_at = now
                    .checked_add_signed(self.window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
                    .max(valid_until);
                state.seen.insert(nonce.to_string(), expires_at);
                true
            }
        }
    }

    /// Number of remembered nonces
    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    /// Check if no nonce is remembered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NonceStore for InMemoryNonceStore {
    fn check_and_record(&self, nonce: &str, valid_until: DateTime<Utc>) -> bool {
        self.check_and_record_at(nonce, valid_until, Utc::now())
    }
}
