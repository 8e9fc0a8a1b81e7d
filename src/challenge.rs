//! Challenge registry: the authoritative source of truth for outstanding
//! payment challenges.
//!
//! A challenge is a single-use, time-boxed payment intent. The registry
//! hands out read-only clones; the stored entry is never mutated after
//! creation, only deleted — either by explicit consumption or by expiry.
//! Expiry is enforced lazily on lookup and via a sweep piggybacked on
//! `create`, so no background timer is required for correctness. An idle
//! registry can therefore hold expired entries until the next `create`
//! call; entries are small and bounded by the expiry window times the
//! request rate.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::{Rng, rng};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::chain::Address;
use crate::timestamp::UnixTimestamp;

/// Default validity window for a freshly issued challenge.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Default upper bound on outstanding challenges. Challenge creation is
/// attacker-triggerable (any unauthenticated request mints one), so the
/// registry refuses to grow past this bound instead of exhausting memory.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// A single-use payment intent issued by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Unique identifier, 32 bytes of CSPRNG output, hex-encoded.
    pub nonce: String,
    /// Secondary random value bound into the signed message so a signature
    /// over one challenge can never be replayed against another.
    pub salt: String,
    /// Price owed, in decimal currency units.
    pub amount: Decimal,
    /// The payee wallet address.
    pub recipient: Address,
    /// Absolute expiry; the challenge is invalid once `now` passes this.
    pub expires_at: UnixTimestamp,
}

impl Challenge {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_past()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeStoreError {
    #[error("challenge registry is at capacity ({0} entries)")]
    CapacityExceeded(usize),
}

/// Storage contract for outstanding challenges.
///
/// The gate depends only on this trait; the in-memory map below serves
/// single-instance deployments, and a shared key-value store can stand in
/// behind the same interface for multi-instance ones (hence `async`).
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Mints a new challenge for `amount` payable to `recipient` and
    /// stores it keyed by nonce.
    async fn create(
        &self,
        amount: Decimal,
        recipient: Address,
    ) -> Result<Challenge, ChallengeStoreError>;

    /// Returns the challenge for `nonce` if present and unexpired. An
    /// expired entry is deleted as a side effect and reported not-found;
    /// a missing nonce is not an error, it just means the caller must be
    /// issued a fresh challenge.
    async fn get(&self, nonce: &str) -> Option<Challenge>;

    /// Removes the challenge idempotently. Exactly one concurrent caller
    /// observes the removed challenge; everyone else gets `None`.
    async fn consume(&self, nonce: &str) -> Option<Challenge>;
}

/// In-memory, concurrency-safe challenge registry.
#[derive(Debug)]
pub struct InMemoryChallengeStore {
    entries: DashMap<String, Challenge>,
    window_secs: u64,
    max_entries: usize,
}

impl InMemoryChallengeStore {
    pub fn new(window_secs: u64, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            window_secs,
            max_entries,
        }
    }

    /// Drops every expired entry. O(n) over the current store; piggybacked
    /// on `create` so the map stays bounded without a background task.
    fn sweep(&self) {
        self.entries.retain(|_, challenge| !challenge.is_expired());
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS, DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn create(
        &self,
        amount: Decimal,
        recipient: Address,
    ) -> Result<Challenge, ChallengeStoreError> {
        self.sweep();
        if self.entries.len() >= self.max_entries {
            return Err(ChallengeStoreError::CapacityExceeded(self.max_entries));
        }
        let nonce_bytes: [u8; 32] = rng().random();
        let salt_bytes: [u8; 16] = rng().random();
        let challenge = Challenge {
            nonce: hex::encode(nonce_bytes),
            salt: hex::encode(salt_bytes),
            amount,
            recipient,
            expires_at: UnixTimestamp::now() + self.window_secs,
        };
        self.entries
            .insert(challenge.nonce.clone(), challenge.clone());
        Ok(challenge)
    }

    async fn get(&self, nonce: &str) -> Option<Challenge> {
        let challenge = {
            let entry = self.entries.get(nonce)?;
            entry.value().clone()
            // Guard dropped here; removal below must not hold it.
        };
        if challenge.is_expired() {
            self.entries.remove(nonce);
            return None;
        }
        Some(challenge)
    }

    async fn consume(&self, nonce: &str) -> Option<Challenge> {
        let (_, challenge) = self.entries.remove(nonce)?;
        if challenge.is_expired() {
            return None;
        }
        Some(challenge)
    }
}
