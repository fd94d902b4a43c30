#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use base64::prelude::*;
use ed25519_dalek::{Signer as _, SigningKey};
use near_passport::{
    AccessKeyChecker, AccountId, AttestationId, Clock, ED25519PublicKey, InMemoryContract,
    InMemoryNonceStore, NonceStore, ProofVerification, RegistrationRequest, StepKind, StepStatus,
    VerificationContract, VerificationOutcome, VerificationRecord, Verifier, VerifierConfig,
    ZkProof,
    errors::{AccessKeyError, ContractError, ErrorCode, NonceStoreError, ProofServiceError},
    self_xyz::ProofVerifier,
    types::{
        nep413::{self, Nonce},
        proof::{DiscloseOutput, UserData, ValidityDetails},
    },
};
use serde_json::{Value, json};

pub const CHALLENGE: &str = "Identify myself";
pub const NOW_MS: u64 = 1_750_000_000_000;
pub const NULLIFIER: &str = "7391634298423745197231640126853281974612834712";

/// A NEAR account holder with a deterministic ed25519 key.
pub struct Wallet {
    pub account_id: AccountId,
    key: SigningKey,
}

impl Wallet {
    pub fn new(account: &str, seed: u8) -> Self {
        Self {
            account_id: account.parse().unwrap(),
            key: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn alice() -> Self {
        Self::new("alice.near", 1)
    }

    pub fn bob() -> Self {
        Self::new("bob.near", 2)
    }

    pub fn public_key(&self) -> String {
        format!(
            "ed25519:{}",
            bs58::encode(self.key.verifying_key().to_bytes()).into_string()
        )
    }

    pub fn sign(&self, message: &str, nonce: &[u8; 32], recipient: &str) -> String {
        let hash = nep413::compute_hash(message, nonce, recipient).unwrap();
        BASE64_STANDARD.encode(self.key.sign(&hash.0).to_bytes())
    }

    /// The JSON object a frontend embeds in the Self.xyz user context data.
    pub fn context(&self, nonce: [u8; 32]) -> Value {
        json!({
            "accountId": self.account_id,
            "signature": self.sign(CHALLENGE, &nonce, self.account_id.as_str()),
            "publicKey": self.public_key(),
            "nonce": BASE64_STANDARD.encode(nonce),
            "timestamp": NOW_MS - 30_000,
        })
    }
}

/// Nonce whose first 8 bytes carry a millisecond timestamp, the rest `seed`.
pub fn nonce(seed: u8) -> [u8; 32] {
    let mut nonce = [seed; 32];
    nonce[..8].copy_from_slice(&NOW_MS.to_be_bytes());
    nonce
}

/// Hex of the JSON, NUL padded the way Self.xyz pads user defined data.
pub fn encode(context: &Value) -> String {
    let mut bytes = context.to_string().into_bytes();
    bytes.resize(bytes.len().max(512), 0);
    hex::encode(bytes)
}

pub fn proof() -> ZkProof {
    ZkProof {
        a: ["1".into(), "2".into()],
        b: [["3".into(), "4".into()], ["5".into(), "6".into()]],
        c: ["7".into(), "8".into()],
    }
}

pub fn request(user_context_data: String) -> RegistrationRequest {
    RegistrationRequest {
        attestation_id: Some(AttestationId::Passport),
        proof: Some(proof()),
        public_signals: Some(vec!["11".to_string(), "12".to_string()]),
        user_context_data: Some(user_context_data),
    }
}

pub fn verification(nullifier: Option<&str>) -> ProofVerification {
    ProofVerification {
        is_valid_details: ValidityDetails {
            is_valid: true,
            is_minimum_age_valid: true,
            is_ofac_valid: Some(true),
        },
        disclose_output: Some(DiscloseOutput {
            nullifier: nullifier.map(str::to_owned),
            nationality: Some("FRA".to_string()),
            minimum_age: Some("18".to_string()),
        }),
        user_data: Some(UserData {
            user_identifier: String::new(),
            user_defined_data: String::new(),
        }),
    }
}

pub struct FakeProofs {
    response: Mutex<Result<ProofVerification, String>>,
    pub calls: AtomicUsize,
}

impl FakeProofs {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(Ok(verification(Some(NULLIFIER)))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(&self, response: ProofVerification) {
        *self.response.lock().unwrap() = Ok(response);
    }

    pub fn fail(&self, error: &str) {
        *self.response.lock().unwrap() = Err(error.to_string());
    }

    /// Applies `change` to the current successful answer.
    pub fn update(&self, change: impl FnOnce(&mut ProofVerification)) {
        let mut response = self.response.lock().unwrap();
        if let Ok(verification) = response.as_mut() {
            change(verification);
        }
    }
}

#[async_trait::async_trait]
impl ProofVerifier for FakeProofs {
    async fn verify(
        &self,
        _: AttestationId,
        _: &ZkProof,
        _: &[String],
        _: &str,
    ) -> Result<ProofVerification, ProofServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(ProofServiceError::Unavailable)
    }
}

pub struct FakeKeys {
    response: Mutex<Result<bool, String>>,
}

impl FakeKeys {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(Ok(true)),
        }
    }

    pub fn answer(&self, is_full_access: bool) {
        *self.response.lock().unwrap() = Ok(is_full_access);
    }

    pub fn fail(&self, error: &str) {
        *self.response.lock().unwrap() = Err(error.to_string());
    }
}

#[async_trait::async_trait]
impl AccessKeyChecker for FakeKeys {
    async fn has_full_access_key(
        &self,
        _: &AccountId,
        _: &ED25519PublicKey,
    ) -> Result<bool, AccessKeyError> {
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(AccessKeyError::UnexpectedResponse)
    }
}

pub struct FixedClock(pub AtomicU64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Accepts every nonce, as a store that lost its state would.
pub struct ForgetfulNonces;

#[async_trait::async_trait]
impl NonceStore for ForgetfulNonces {
    async fn reserve(
        &self,
        _: &AccountId,
        _: &Nonce,
        _: std::time::Duration,
    ) -> Result<bool, NonceStoreError> {
        Ok(true)
    }

    async fn release(&self, _: &AccountId, _: &Nonce) -> Result<(), NonceStoreError> {
        Ok(())
    }
}

pub struct BrokenNonces;

#[async_trait::async_trait]
impl NonceStore for BrokenNonces {
    async fn reserve(
        &self,
        _: &AccountId,
        _: &Nonce,
        _: std::time::Duration,
    ) -> Result<bool, NonceStoreError> {
        Err(NonceStoreError::Unavailable("connection refused".to_string()))
    }

    async fn release(&self, _: &AccountId, _: &Nonce) -> Result<(), NonceStoreError> {
        Err(NonceStoreError::Unavailable("connection refused".to_string()))
    }
}

pub struct UnavailableContract;

#[async_trait::async_trait]
impl VerificationContract for UnavailableContract {
    async fn is_verified(&self, _: &AccountId) -> Result<bool, ContractError> {
        Err(ContractError::Unavailable("rpc down".to_string()))
    }

    async fn get_verification(
        &self,
        _: &AccountId,
    ) -> Result<Option<VerificationRecord>, ContractError> {
        Err(ContractError::Unavailable("rpc down".to_string()))
    }

    async fn store_verification(&self, _: &VerificationRecord) -> Result<(), ContractError> {
        Err(ContractError::Unavailable("rpc down".to_string()))
    }

    async fn list_verifications(
        &self,
        _: u64,
        _: u32,
    ) -> Result<Vec<VerificationRecord>, ContractError> {
        Err(ContractError::Unavailable("rpc down".to_string()))
    }
}

/// Fails the first `outages` writes with `Unavailable`, then stores normally.
pub struct FlakyContract {
    pub inner: InMemoryContract,
    outages: AtomicUsize,
}

impl FlakyContract {
    pub fn new(outages: usize) -> Self {
        Self {
            inner: InMemoryContract::new(),
            outages: AtomicUsize::new(outages),
        }
    }
}

#[async_trait::async_trait]
impl VerificationContract for FlakyContract {
    async fn is_verified(&self, account_id: &AccountId) -> Result<bool, ContractError> {
        self.inner.is_verified(account_id).await
    }

    async fn get_verification(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<VerificationRecord>, ContractError> {
        self.inner.get_verification(account_id).await
    }

    async fn store_verification(&self, record: &VerificationRecord) -> Result<(), ContractError> {
        let outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if outage {
            return Err(ContractError::Unavailable("rpc timeout".to_string()));
        }
        self.inner.store_verification(record).await
    }

    async fn list_verifications(
        &self,
        from_index: u64,
        limit: u32,
    ) -> Result<Vec<VerificationRecord>, ContractError> {
        self.inner.list_verifications(from_index, limit).await
    }
}

pub struct Harness {
    pub proofs: Arc<FakeProofs>,
    pub contract: Arc<InMemoryContract>,
    pub nonces: Arc<InMemoryNonceStore>,
    pub keys: Arc<FakeKeys>,
    pub clock: Arc<FixedClock>,
    pub config: VerifierConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            proofs: Arc::new(FakeProofs::new()),
            contract: Arc::new(InMemoryContract::new()),
            nonces: Arc::new(InMemoryNonceStore::new()),
            keys: Arc::new(FakeKeys::new()),
            clock: Arc::new(FixedClock(AtomicU64::new(NOW_MS))),
            config: VerifierConfig::default(),
        }
    }

    pub fn verifier(&self) -> Verifier {
        self.verifier_with(self.contract.clone(), self.nonces.clone())
    }

    pub fn verifier_with(
        &self,
        contract: Arc<dyn VerificationContract>,
        nonces: Arc<dyn NonceStore>,
    ) -> Verifier {
        Verifier::new(self.config.clone(), self.proofs.clone(), contract, nonces)
            .with_access_keys(self.keys.clone())
            .with_clock(self.clock.clone())
    }
}

/// Every step before `failed` succeeded, `failed` carries `code`, the rest never ran.
pub fn assert_halted_at(outcome: &VerificationOutcome, failed: StepKind, code: ErrorCode) {
    assert!(!outcome.verified, "outcome unexpectedly verified: {outcome:#?}");
    assert_eq!(outcome.error_code, Some(code), "{outcome:#?}");

    let position = outcome
        .steps
        .iter()
        .position(|step| step.name == failed)
        .unwrap_or_else(|| panic!("{failed:?} not planned: {outcome:#?}"));
    for (index, step) in outcome.steps.iter().enumerate() {
        let expected = match index.cmp(&position) {
            std::cmp::Ordering::Less => StepStatus::Success,
            std::cmp::Ordering::Equal => StepStatus::Error,
            std::cmp::Ordering::Greater => StepStatus::Pending,
        };
        assert_eq!(step.status, expected, "step {:?}: {outcome:#?}", step.name);
    }
}

pub fn assert_verified(outcome: &VerificationOutcome) {
    assert!(outcome.verified, "{outcome:#?}");
    assert_eq!(outcome.error_code, None);
    assert!(
        outcome
            .steps
            .iter()
            .all(|step| step.status == StepStatus::Success)
    );
}
