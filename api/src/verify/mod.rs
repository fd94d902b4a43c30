//! The verification flow: binds a Self.xyz passport proof to a NEAR account.
//!
//! A [`Verifier`] runs one of two fixed plans and stops at the first failing step.
//!
//! Registration:
//! `VerifyZkProof → CheckMinimumAge → [CheckOfac] → ParseSignatureBundle →
//! VerifySignature → [CheckKeyLiveness] → CheckNonceReplay → StoreOnChain`
//!
//! Re-verification of a stored record:
//! `LoadAccount → VerifyZkProof → CheckMinimumAge → [CheckOfac] →
//! ParseSignatureBundle → VerifySignature → [CheckKeyLiveness]`
//!
//! Bracketed steps are planned only when enabled. Re-verification tolerates an
//! unreachable proof verifier or RPC node and keeps the on-chain status in that case.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use near_passport::{
//!     InMemoryContract, InMemoryNonceStore, NetworkConfig, RegistrationRequest,
//!     RpcAccessKeyChecker, Verifier, VerifierConfig, self_xyz::HttpProofVerifier,
//! };
//!
//! # async fn example(request: RegistrationRequest) -> Result<(), Box<dyn std::error::Error>> {
//! let proofs = HttpProofVerifier::new(
//!     "http://localhost:3001/verify".parse()?,
//!     std::time::Duration::from_secs(30),
//! )?;
//! let verifier = Verifier::new(
//!     VerifierConfig::default(),
//!     Arc::new(proofs),
//!     Arc::new(InMemoryContract::new()),
//!     Arc::new(InMemoryNonceStore::new()),
//! )
//! .with_access_keys(Arc::new(RpcAccessKeyChecker::new(NetworkConfig::testnet())?));
//!
//! let outcome = verifier.register(&request).await;
//! println!("{}", serde_json::to_string_pretty(&outcome)?);
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use near_passport_types::{
    AccountId, AttestationId, ED25519PublicKey, ErrorCode, NearSignatureBundle,
    ProofVerification, ZkProof, context::parse_user_context_data, nep413,
    proof::validate_public_signals,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    access_key::AccessKeyChecker,
    config::VerifierConfig,
    contract::{VerificationContract, VerificationRecord},
    errors::ContractError,
    nonce::NonceStore,
    self_xyz::ProofVerifier,
};

mod outcome;

pub use outcome::{
    ProofData, SignatureAudit, StepKind, StepStatus, VerificationOutcome, VerificationStep,
};
use outcome::{Pass, StepFailure};

pub(crate) const VERIFIER_TARGET: &str = "near_passport::verifier";

/// Source of the current time in milliseconds since epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
    }
}

/// What Self.xyz delivers once the user finished the passport scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(default)]
    pub attestation_id: Option<AttestationId>,
    #[serde(default)]
    pub proof: Option<ZkProof>,
    #[serde(default)]
    pub public_signals: Option<Vec<String>>,
    #[serde(default)]
    pub user_context_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Registration,
    Reverification,
}

pub struct Verifier {
    config: VerifierConfig,
    proofs: Arc<dyn ProofVerifier>,
    contract: Arc<dyn VerificationContract>,
    nonces: Arc<dyn NonceStore>,
    access_keys: Option<Arc<dyn AccessKeyChecker>>,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    pub fn new(
        config: VerifierConfig,
        proofs: Arc<dyn ProofVerifier>,
        contract: Arc<dyn VerificationContract>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        Self {
            config,
            proofs,
            contract,
            nonces,
            access_keys: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Installs a key liveness checker. Used when `check_key_liveness` is on.
    pub fn with_access_keys(mut self, access_keys: Arc<dyn AccessKeyChecker>) -> Self {
        self.access_keys = Some(access_keys);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn contract(&self) -> &dyn VerificationContract {
        self.contract.as_ref()
    }

    fn liveness_checker(&self) -> Option<&dyn AccessKeyChecker> {
        self.access_keys
            .as_deref()
            .filter(|_| self.config.check_key_liveness)
    }

    pub fn registration_plan(&self) -> Vec<StepKind> {
        let mut plan = vec![StepKind::VerifyZkProof, StepKind::CheckMinimumAge];
        if self.config.require_ofac {
            plan.push(StepKind::CheckOfac);
        }
        plan.extend([StepKind::ParseSignatureBundle, StepKind::VerifySignature]);
        if self.liveness_checker().is_some() {
            plan.push(StepKind::CheckKeyLiveness);
        }
        plan.extend([StepKind::CheckNonceReplay, StepKind::StoreOnChain]);
        plan
    }

    pub fn reverification_plan(&self) -> Vec<StepKind> {
        let mut plan = vec![
            StepKind::LoadAccount,
            StepKind::VerifyZkProof,
            StepKind::CheckMinimumAge,
        ];
        if self.config.require_ofac {
            plan.push(StepKind::CheckOfac);
        }
        plan.extend([StepKind::ParseSignatureBundle, StepKind::VerifySignature]);
        if self.liveness_checker().is_some() {
            plan.push(StepKind::CheckKeyLiveness);
        }
        plan
    }

    /// Verifies a fresh proof and stores it on-chain.
    #[instrument(skip_all, fields(account_id = tracing::field::Empty))]
    pub async fn register(&self, request: &RegistrationRequest) -> VerificationOutcome {
        let mut pass = Pass::new(&self.registration_plan());
        let result = self.run_registration(&mut pass, request).await;
        let outcome = pass.finish(result);
        log_outcome("Registration", &outcome);
        outcome
    }

    /// Re-checks the record stored for `account_id`.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn reverify(&self, account_id: &AccountId) -> VerificationOutcome {
        let mut pass = Pass::new(&self.reverification_plan());
        let result = self.run_reverification(&mut pass, account_id).await;
        let outcome = pass.finish(result);
        log_outcome("Re-verification", &outcome);
        outcome
    }

    async fn run_registration(
        &self,
        pass: &mut Pass,
        request: &RegistrationRequest,
    ) -> Result<(), StepFailure> {
        pass.begin(StepKind::VerifyZkProof);
        let (attestation_id, proof, public_signals, user_context_data) = required_fields(request)?;
        proof
            .validate()
            .and_then(|()| validate_public_signals(public_signals))
            .map_err(|err| StepFailure::new(ErrorCode::from(&err), err.to_string()))?;

        let verification = self
            .proofs
            .verify(attestation_id, proof, public_signals, user_context_data)
            .await
            .map_err(|err| {
                StepFailure::new(
                    ErrorCode::VerificationFailed,
                    format!("Proof verifier failed: {err}"),
                )
            })?;
        if !verification.is_valid_details.is_valid {
            return Err(StepFailure::new(
                ErrorCode::VerificationFailed,
                "Zero-knowledge proof is not valid",
            ));
        }
        let nullifier = verification.nullifier().ok_or_else(|| {
            StepFailure::new(ErrorCode::NullifierMissing, "Proof did not disclose a nullifier")
        })?;
        pass.proof_data = Some(ProofData::new(
            attestation_id,
            proof,
            public_signals,
            Some(nullifier),
        ));
        pass.live_proof_checked = true;
        pass.succeed("Zero-knowledge proof verified");

        self.check_disclosures(pass, Some(&verification))?;

        let bundle = parse_bundle(pass, user_context_data)?;
        tracing::Span::current().record("account_id", tracing::field::display(&bundle.account_id));

        pass.begin(StepKind::VerifySignature);
        let recipient = self.check_signature(pass, &bundle)?;
        self.check_freshness(&bundle)?;
        if let Some(identifier) = verification.user_identifier() {
            if names_other_account(identifier, &bundle.account_id) {
                return Err(StepFailure::new(
                    ErrorCode::NearSignatureInvalid,
                    format!(
                        "Proof was requested for {identifier}, signature is from {}",
                        bundle.account_id
                    ),
                ));
            }
        }
        pass.succeed("NEAR signature verified");

        if let Some(checker) = self.liveness_checker() {
            check_key_liveness(pass, checker, &bundle, Mode::Registration).await?;
        }

        pass.begin(StepKind::CheckNonceReplay);
        if bundle.nonce.is_zero() {
            return Err(StepFailure::new(
                ErrorCode::NonceInvalid,
                "Nonce must not be all zeros",
            ));
        }
        match self
            .nonces
            .reserve(&bundle.account_id, &bundle.nonce, self.config.nonce_ttl)
            .await
        {
            Ok(true) => pass.succeed("Nonce reserved"),
            Ok(false) => {
                return Err(StepFailure::new(
                    ErrorCode::NonceAlreadyUsed,
                    "Nonce was already used",
                ));
            }
            Err(err) => {
                return Err(StepFailure::new(
                    ErrorCode::InternalError,
                    format!("Nonce store failed: {err}"),
                ));
            }
        }

        pass.begin(StepKind::StoreOnChain);
        let record = VerificationRecord {
            account_id: bundle.account_id.clone(),
            nullifier: nullifier.to_string(),
            user_identifier: verification.user_identifier().unwrap_or_default().to_string(),
            attestation_id,
            signature: bundle.signature.clone(),
            public_key: bundle.public_key.clone(),
            nonce: bundle.nonce,
            challenge: self.config.challenge_message.clone(),
            recipient,
            proof: proof.clone(),
            public_signals: public_signals.to_vec(),
            user_context_data: user_context_data.to_string(),
            verified_at: self.clock.now_ms(),
        };
        match self.store(&record).await {
            Ok(message) => pass.succeed(message),
            Err(failure) => {
                // Nothing was stored, so the same signed request may be retried.
                if failure.code == ErrorCode::StorageFailed {
                    if let Err(err) = self
                        .nonces
                        .release(&bundle.account_id, &bundle.nonce)
                        .await
                    {
                        warn!(target: VERIFIER_TARGET, error = %err, "Failed to release nonce");
                    }
                }
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Stores `record`. A repeated registration of the same identity succeeds,
    /// a different identity for an already verified account does not.
    async fn store(&self, record: &VerificationRecord) -> Result<&'static str, StepFailure> {
        match self.contract.store_verification(record).await {
            Ok(()) => Ok("Verification stored on-chain"),
            Err(ContractError::AccountAlreadyVerified) => {
                match self.contract.get_verification(&record.account_id).await {
                    Ok(Some(stored)) if stored.nullifier == record.nullifier => {
                        Ok("Account was already verified")
                    }
                    Ok(Some(_)) => Err(StepFailure::new(
                        ErrorCode::AccountAlreadyVerified,
                        "Account is already verified with a different identity",
                    )),
                    Ok(None) => Err(StepFailure::new(
                        ErrorCode::StorageFailed,
                        "Registry reported an existing verification but returned none",
                    )),
                    Err(err) => Err(StepFailure::new(
                        ErrorCode::StorageFailed,
                        format!("Failed to load existing verification: {err}"),
                    )),
                }
            }
            Err(ContractError::DuplicateIdentity) => Err(StepFailure::new(
                ErrorCode::DuplicateIdentity,
                "This identity is already bound to another account",
            )),
            Err(err) => Err(StepFailure::new(
                ErrorCode::StorageFailed,
                format!("Failed to store verification: {err}"),
            )),
        }
    }

    async fn run_reverification(
        &self,
        pass: &mut Pass,
        account_id: &AccountId,
    ) -> Result<(), StepFailure> {
        pass.begin(StepKind::LoadAccount);
        let record = match self.contract.get_verification(account_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(StepFailure::new(
                    ErrorCode::NotFound,
                    format!("{account_id} has no verification record"),
                ));
            }
            Err(err) => {
                return Err(StepFailure::new(
                    ErrorCode::StorageFailed,
                    format!("Failed to load verification: {err}"),
                ));
            }
        };
        pass.proof_data = Some(ProofData::from(&record));
        pass.succeed("Verification record loaded");

        pass.begin(StepKind::VerifyZkProof);
        let live = match self
            .proofs
            .verify(
                record.attestation_id,
                &record.proof,
                &record.public_signals,
                &record.user_context_data,
            )
            .await
        {
            Ok(verification) if !verification.is_valid_details.is_valid => {
                return Err(StepFailure::new(
                    ErrorCode::VerificationFailed,
                    "Stored proof no longer verifies",
                ));
            }
            Ok(verification)
                if verification
                    .nullifier()
                    .is_some_and(|nullifier| nullifier != record.nullifier) =>
            {
                return Err(StepFailure::new(
                    ErrorCode::VerificationFailed,
                    "Proof discloses a different nullifier than the stored one",
                ));
            }
            Ok(verification) => {
                pass.live_proof_checked = true;
                pass.succeed("Zero-knowledge proof verified");
                Some(verification)
            }
            Err(err) => {
                warn!(target: VERIFIER_TARGET, error = %err, "Proof verifier unavailable, keeping on-chain status");
                pass.succeed("RPC verification unavailable, on-chain verification status kept");
                None
            }
        };

        self.check_disclosures(pass, live.as_ref())?;

        let bundle = parse_bundle(pass, &record.user_context_data)?;

        pass.begin(StepKind::VerifySignature);
        if bundle.account_id != *account_id {
            return Err(StepFailure::new(
                ErrorCode::NearSignatureInvalid,
                format!("Stored signature is from {}", bundle.account_id),
            ));
        }
        self.check_signature(pass, &bundle)?;
        pass.succeed("NEAR signature verified");

        if let Some(checker) = self.liveness_checker() {
            check_key_liveness(pass, checker, &bundle, Mode::Reverification).await?;
        }
        Ok(())
    }

    /// Age and OFAC disclosures. `None` means the live proof could not be checked.
    fn check_disclosures(
        &self,
        pass: &mut Pass,
        verification: Option<&ProofVerification>,
    ) -> Result<(), StepFailure> {
        pass.begin(StepKind::CheckMinimumAge);
        match verification {
            None => pass.succeed("Skipped, live verification unavailable"),
            Some(verification) if !verification.is_valid_details.is_minimum_age_valid => {
                return Err(StepFailure::new(
                    ErrorCode::MinimumAgeNotMet,
                    "Minimum age requirement not met",
                ));
            }
            Some(_) => pass.succeed("Minimum age requirement met"),
        }

        if self.config.require_ofac {
            pass.begin(StepKind::CheckOfac);
            match verification {
                None => pass.succeed("Skipped, live verification unavailable"),
                Some(verification) if verification.is_ofac_rejected() => {
                    return Err(StepFailure::new(
                        ErrorCode::OfacCheckFailed,
                        "Identity matched an OFAC sanctions list",
                    ));
                }
                Some(_) => pass.succeed("OFAC screening passed"),
            }
        }
        Ok(())
    }

    /// Checks challenge, recipient and the ed25519 signature. Returns the recipient.
    fn check_signature(
        &self,
        pass: &mut Pass,
        bundle: &NearSignatureBundle,
    ) -> Result<String, StepFailure> {
        let challenge = self.config.challenge_message.as_str();
        if bundle
            .challenge
            .as_deref()
            .is_some_and(|signed| signed != challenge)
        {
            return Err(StepFailure::new(
                ErrorCode::NearSignatureInvalid,
                "Signed challenge does not match the expected message",
            ));
        }

        let recipient = bundle
            .recipient
            .clone()
            .unwrap_or_else(|| bundle.account_id.to_string());
        if recipient != bundle.account_id.as_str() {
            return Err(StepFailure::new(
                ErrorCode::NearSignatureInvalid,
                format!("Signature recipient {recipient} is not {}", bundle.account_id),
            ));
        }

        pass.attach_signature(SignatureAudit::new(bundle, challenge, &recipient));

        let verification = nep413::verify(
            challenge,
            &bundle.signature,
            &bundle.public_key,
            &bundle.nonce.0,
            &recipient,
        );
        if !verification.valid {
            return Err(StepFailure::new(
                ErrorCode::NearSignatureInvalid,
                verification
                    .error
                    .unwrap_or_else(|| "Signature verification failed".to_string()),
            ));
        }
        Ok(recipient)
    }

    fn check_freshness(&self, bundle: &NearSignatureBundle) -> Result<(), StepFailure> {
        let Some(signed_at) = bundle.timestamp else {
            return Ok(());
        };
        let now = self.clock.now_ms();

        if signed_at > now.saturating_add(as_millis(self.config.max_clock_skew)) {
            return Err(StepFailure::new(
                ErrorCode::SignatureTimestampInvalid,
                "Signature timestamp is in the future",
            ));
        }
        if let Some(max_age) = self.config.max_signature_age {
            if now.saturating_sub(signed_at) > as_millis(max_age) {
                return Err(StepFailure::new(
                    ErrorCode::SignatureExpired,
                    "Signature is too old",
                ));
            }
        }
        Ok(())
    }
}

fn required_fields(
    request: &RegistrationRequest,
) -> Result<(AttestationId, &ZkProof, &[String], &str), StepFailure> {
    let user_context_data = request
        .user_context_data
        .as_deref()
        .filter(|data| !data.trim().is_empty());

    match (
        request.attestation_id,
        request.proof.as_ref(),
        request.public_signals.as_deref(),
        user_context_data,
    ) {
        (Some(attestation_id), Some(proof), Some(public_signals), Some(user_context_data)) => {
            Ok((attestation_id, proof, public_signals, user_context_data))
        }
        _ => {
            let missing: Vec<&str> = [
                ("attestationId", request.attestation_id.is_none()),
                ("proof", request.proof.is_none()),
                ("publicSignals", request.public_signals.is_none()),
                ("userContextData", user_context_data.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, is_missing)| is_missing.then_some(field))
            .collect();
            Err(StepFailure::new(
                ErrorCode::MissingFields,
                format!("Missing required fields: {}", missing.join(", ")),
            ))
        }
    }
}

fn parse_bundle(pass: &mut Pass, user_context_data: &str) -> Result<NearSignatureBundle, StepFailure> {
    pass.begin(StepKind::ParseSignatureBundle);
    let bundle = parse_user_context_data(user_context_data).map_err(|err| {
        StepFailure::new(
            ErrorCode::from(&err),
            format!("No NEAR signature in user context data: {err}"),
        )
    })?;
    pass.succeed(format!("Signature bundle for {}", bundle.account_id));
    Ok(bundle)
}

async fn check_key_liveness(
    pass: &mut Pass,
    checker: &dyn AccessKeyChecker,
    bundle: &NearSignatureBundle,
    mode: Mode,
) -> Result<(), StepFailure> {
    pass.begin(StepKind::CheckKeyLiveness);
    let public_key: ED25519PublicKey = bundle.public_key.parse().map_err(|err| {
        StepFailure::new(
            ErrorCode::NearSignatureInvalid,
            format!("Invalid public key: {err}"),
        )
    })?;

    match checker
        .has_full_access_key(&bundle.account_id, &public_key)
        .await
    {
        Ok(true) => pass.succeed("Signing key is a full access key"),
        Ok(false) => {
            return Err(StepFailure::new(
                ErrorCode::KeyNotAuthorized,
                format!(
                    "{public_key} is not a full access key of {}",
                    bundle.account_id
                ),
            ));
        }
        Err(err) if mode == Mode::Reverification => {
            warn!(target: VERIFIER_TARGET, error = %err, "Key liveness unavailable");
            pass.succeed(format!("Key liveness unavailable: {err}"));
        }
        Err(err) => {
            return Err(StepFailure::new(
                ErrorCode::InternalError,
                format!("Key liveness check failed: {err}"),
            ));
        }
    }
    Ok(())
}

/// A user identifier that is itself a named NEAR account must be the signing account.
fn names_other_account(identifier: &str, account_id: &AccountId) -> bool {
    identifier.contains('.')
        && identifier
            .parse::<AccountId>()
            .is_ok_and(|named| named != *account_id)
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn log_outcome(flow: &str, outcome: &VerificationOutcome) {
    match (outcome.verified, outcome.error_code) {
        (true, _) => info!(
            target: VERIFIER_TARGET,
            live_proof_checked = outcome.live_proof_checked,
            "{flow} succeeded"
        ),
        (false, code) => info!(
            target: VERIFIER_TARGET,
            error_code = ?code,
            failed_step = ?outcome.failed_step().map(|step| step.name),
            "{flow} failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_identifier_only_binds_named_accounts() {
        let alice: AccountId = "alice.near".parse().unwrap();
        assert!(names_other_account("bob.near", &alice));
        assert!(!names_other_account("alice.near", &alice));
        assert!(!names_other_account("550e8400-e29b-41d4-a716-446655440000", &alice));
        assert!(!names_other_account("0x1234abcd", &alice));
    }

    #[test]
    fn missing_fields_are_listed() {
        let request = RegistrationRequest {
            attestation_id: Some(AttestationId::Passport),
            user_context_data: Some("  ".to_string()),
            ..Default::default()
        };
        let failure = required_fields(&request).unwrap_err();
        assert_eq!(failure.code, ErrorCode::MissingFields);
        assert_eq!(
            failure.message,
            "Missing required fields: proof, publicSignals, userContextData"
        );
    }

    #[test]
    fn request_parses_self_webhook_body() {
        let request: RegistrationRequest = serde_json::from_str(
            r#"{
                "attestationId": 1,
                "proof": { "a": ["1", "2"], "b": [["3", "4"], ["5", "6"]], "c": ["7", "8"] },
                "publicSignals": ["9"],
                "userContextData": "7b7d"
            }"#,
        )
        .unwrap();
        assert_eq!(request.attestation_id, Some(AttestationId::Passport));
        assert_eq!(request.public_signals.as_deref(), Some(&["9".to_string()][..]));

        let empty: RegistrationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RegistrationRequest::default());
    }
}
