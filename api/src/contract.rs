//! Client seam for the on-chain verification registry.
//!
//! The registry maps an account to the passport proof it was verified with and
//! enforces that one identity nullifier is bound to at most one account.

use std::collections::{BTreeMap, HashMap};

use near_passport_types::{
    AccountId, AttestationId, ZkProof, errors::ProofFormatError, nep413::Nonce,
    proof::validate_public_signals,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    config::{RetryPolicy, RetryResponse, retry},
    errors::ContractError,
};

const CONTRACT_TARGET: &str = "near_passport::contract";

/// Most records returned by one [`VerificationContract::list_verifications`] call.
pub const MAX_PAGE_SIZE: u32 = 100;

/// What the registry stores for a verified account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub account_id: AccountId,
    pub nullifier: String,
    pub user_identifier: String,
    pub attestation_id: AttestationId,
    pub signature: String,
    pub public_key: String,
    pub nonce: Nonce,
    pub challenge: String,
    pub recipient: String,
    pub proof: ZkProof,
    pub public_signals: Vec<String>,
    /// Exactly what Self.xyz echoed back, so the signature can be re-derived later.
    pub user_context_data: String,
    /// Milliseconds since epoch.
    pub verified_at: u64,
}

impl VerificationRecord {
    /// Storage bounds the registry enforces before accepting a record.
    pub fn validate(&self) -> Result<(), ProofFormatError> {
        self.proof.validate()?;
        validate_public_signals(&self.public_signals)
    }
}

#[async_trait::async_trait]
pub trait VerificationContract: Send + Sync {
    async fn is_verified(&self, account_id: &AccountId) -> Result<bool, ContractError>;

    async fn get_verification(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<VerificationRecord>, ContractError>;

    /// Fails with [`ContractError::AccountAlreadyVerified`] if the account has a record and
    /// with [`ContractError::DuplicateIdentity`] if the nullifier belongs to another account.
    async fn store_verification(&self, record: &VerificationRecord) -> Result<(), ContractError>;

    /// Records ordered by account id. `limit` is capped at [`MAX_PAGE_SIZE`].
    async fn list_verifications(
        &self,
        from_index: u64,
        limit: u32,
    ) -> Result<Vec<VerificationRecord>, ContractError>;
}

#[derive(Debug, Default)]
struct Registry {
    records: BTreeMap<AccountId, VerificationRecord>,
    nullifiers: HashMap<String, AccountId>,
}

/// Registry kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryContract {
    registry: tokio::sync::RwLock<Registry>,
}

impl InMemoryContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.read().await.records.is_empty()
    }
}

#[async_trait::async_trait]
impl VerificationContract for InMemoryContract {
    async fn is_verified(&self, account_id: &AccountId) -> Result<bool, ContractError> {
        Ok(self.registry.read().await.records.contains_key(account_id))
    }

    async fn get_verification(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<VerificationRecord>, ContractError> {
        Ok(self.registry.read().await.records.get(account_id).cloned())
    }

    #[instrument(skip(self, record), fields(account_id = %record.account_id))]
    async fn store_verification(&self, record: &VerificationRecord) -> Result<(), ContractError> {
        record
            .validate()
            .map_err(|err| ContractError::Rejected(err.to_string()))?;

        let mut registry = self.registry.write().await;
        if registry.records.contains_key(&record.account_id) {
            debug!(target: CONTRACT_TARGET, "Account already has a verification record");
            return Err(ContractError::AccountAlreadyVerified);
        }
        if registry.nullifiers.contains_key(&record.nullifier) {
            debug!(target: CONTRACT_TARGET, "Nullifier is bound to another account");
            return Err(ContractError::DuplicateIdentity);
        }

        registry
            .nullifiers
            .insert(record.nullifier.clone(), record.account_id.clone());
        registry
            .records
            .insert(record.account_id.clone(), record.clone());
        debug!(target: CONTRACT_TARGET, "Verification record stored");
        Ok(())
    }

    async fn list_verifications(
        &self,
        from_index: u64,
        limit: u32,
    ) -> Result<Vec<VerificationRecord>, ContractError> {
        let skip = usize::try_from(from_index).unwrap_or(usize::MAX);
        let take = limit.min(MAX_PAGE_SIZE) as usize;
        Ok(self
            .registry
            .read()
            .await
            .records
            .values()
            .skip(skip)
            .take(take)
            .cloned()
            .collect())
    }
}

/// Repeats calls that failed with [`ContractError::Unavailable`].
///
/// Every other error is an answer from the registry and is returned as is.
pub struct RetryingContract<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: VerificationContract> RetryingContract<C> {
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub const fn inner(&self) -> &C {
        &self.inner
    }
}

fn classify<R>(result: Result<R, ContractError>) -> RetryResponse<R, ContractError> {
    match result {
        Ok(value) => RetryResponse::Ok(value),
        Err(err) if err.is_transient() => {
            debug!(target: CONTRACT_TARGET, error = %err, "Transient contract failure");
            RetryResponse::Retry(err)
        }
        Err(err) => RetryResponse::Critical(err),
    }
}

#[async_trait::async_trait]
impl<C: VerificationContract> VerificationContract for RetryingContract<C> {
    async fn is_verified(&self, account_id: &AccountId) -> Result<bool, ContractError> {
        Ok(retry(&self.policy, || async move {
            classify(self.inner.is_verified(account_id).await)
        })
        .await?)
    }

    async fn get_verification(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<VerificationRecord>, ContractError> {
        Ok(retry(&self.policy, || async move {
            classify(self.inner.get_verification(account_id).await)
        })
        .await?)
    }

    async fn store_verification(&self, record: &VerificationRecord) -> Result<(), ContractError> {
        Ok(retry(&self.policy, || async move {
            classify(self.inner.store_verification(record).await)
        })
        .await?)
    }

    async fn list_verifications(
        &self,
        from_index: u64,
        limit: u32,
    ) -> Result<Vec<VerificationRecord>, ContractError> {
        Ok(retry(&self.policy, || async move {
            classify(self.inner.list_verifications(from_index, limit).await)
        })
        .await?)
    }
}
