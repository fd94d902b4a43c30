use std::{collections::HashMap, time::Duration};

use near_passport_types::{AccountId, nep413::Nonce};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::errors::NonceStoreError;

const NONCE_TARGET: &str = "near_passport::nonce";

/// Replay protection for signed challenges.
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    /// Atomically records `nonce` for `account_id` unless it is already recorded.
    ///
    /// Returns `false` when the nonce was seen within its TTL.
    async fn reserve(
        &self,
        account_id: &AccountId,
        nonce: &Nonce,
        ttl: Duration,
    ) -> Result<bool, NonceStoreError>;

    /// Drops a reservation so the same signed request can be submitted again.
    async fn release(&self, account_id: &AccountId, nonce: &Nonce) -> Result<(), NonceStoreError>;
}

/// Nonce store kept in process memory. Expired reservations are dropped lazily.
#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    reservations: tokio::sync::Mutex<HashMap<(AccountId, Nonce), Instant>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live reservations.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.reservations
            .lock()
            .await
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn reserve(
        &self,
        account_id: &AccountId,
        nonce: &Nonce,
        ttl: Duration,
    ) -> Result<bool, NonceStoreError> {
        let now = Instant::now();
        let mut reservations = self.reservations.lock().await;

        let before = reservations.len();
        reservations.retain(|_, expires_at| *expires_at > now);
        if reservations.len() < before {
            trace!(target: NONCE_TARGET, expired = before - reservations.len(), "Dropped expired nonces");
        }

        let key = (account_id.clone(), *nonce);
        if reservations.contains_key(&key) {
            debug!(target: NONCE_TARGET, account_id = %account_id, "Nonce already reserved");
            return Ok(false);
        }
        reservations.insert(key, now + ttl);
        debug!(target: NONCE_TARGET, account_id = %account_id, "Nonce reserved");
        Ok(true)
    }

    async fn release(&self, account_id: &AccountId, nonce: &Nonce) -> Result<(), NonceStoreError> {
        let key = (account_id.clone(), *nonce);
        if self.reservations.lock().await.remove(&key).is_some() {
            debug!(target: NONCE_TARGET, account_id = %account_id, "Nonce released");
        }
        Ok(())
    }
}
