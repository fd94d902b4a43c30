use near_passport_types::{
    AccountId, AttestationId, ErrorCode, NearSignatureBundle, ZkProof, nep413,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::VerificationRecord;

use super::VERIFIER_TARGET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    LoadAccount,
    VerifyZkProof,
    CheckMinimumAge,
    CheckOfac,
    ParseSignatureBundle,
    VerifySignature,
    CheckKeyLiveness,
    CheckNonceReplay,
    StoreOnChain,
}

impl StepKind {
    /// Human readable label for progress UIs.
    pub const fn title(self) -> &'static str {
        match self {
            Self::LoadAccount => "Load on-chain verification",
            Self::VerifyZkProof => "Verify zero-knowledge proof",
            Self::CheckMinimumAge => "Check minimum age",
            Self::CheckOfac => "Check OFAC screening",
            Self::ParseSignatureBundle => "Read NEAR signature",
            Self::VerifySignature => "Verify NEAR signature",
            Self::CheckKeyLiveness => "Check signing key",
            Self::CheckNonceReplay => "Check nonce replay",
            Self::StoreOnChain => "Store verification on-chain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStep {
    pub name: StepKind,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The values a third party needs to recheck a verification independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureAudit {
    pub account_id: AccountId,
    pub public_key: String,
    /// Raw 32 key bytes in hex, when the key parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_hex: Option<String>,
    pub signature: String,
    /// Base64.
    pub nonce: String,
    pub challenge: String,
    pub recipient: String,
    /// `SHA256(tag || borsh(payload))` in hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nep413_hash: Option<String>,
}

impl SignatureAudit {
    pub fn new(bundle: &NearSignatureBundle, challenge: &str, recipient: &str) -> Self {
        Self {
            account_id: bundle.account_id.clone(),
            public_key: bundle.public_key.clone(),
            public_key_hex: nep413::extract_ed25519_public_key_hex(&bundle.public_key).ok(),
            signature: bundle.signature.clone(),
            nonce: bundle.nonce.to_base64(),
            challenge: challenge.to_string(),
            recipient: recipient.to_string(),
            nep413_hash: nep413::compute_nep413_hash_hex(challenge, &bundle.nonce.0, recipient)
                .ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofData {
    pub attestation_id: AttestationId,
    pub proof: ZkProof,
    pub public_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureAudit>,
}

impl ProofData {
    pub fn new(
        attestation_id: AttestationId,
        proof: &ZkProof,
        public_signals: &[String],
        nullifier: Option<&str>,
    ) -> Self {
        Self {
            attestation_id,
            proof: proof.clone(),
            public_signals: public_signals.to_vec(),
            nullifier: nullifier.map(str::to_owned),
            signature: None,
        }
    }
}

impl From<&VerificationRecord> for ProofData {
    fn from(record: &VerificationRecord) -> Self {
        Self::new(
            record.attestation_id,
            &record.proof,
            &record.public_signals,
            Some(&record.nullifier),
        )
    }
}

/// Result of one verification pass.
///
/// `verified` is true iff every planned step succeeded. The first failing step
/// carries the error and every later step stays pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub steps: Vec<VerificationStep>,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_data: Option<ProofData>,
    /// False when re-verification fell back to the on-chain status.
    pub live_proof_checked: bool,
}

impl VerificationOutcome {
    pub fn step(&self, kind: StepKind) -> Option<&VerificationStep> {
        self.steps.iter().find(|step| step.name == kind)
    }

    pub fn failed_step(&self) -> Option<&VerificationStep> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Error)
    }

    pub fn http_status(&self) -> u16 {
        match (self.verified, self.error_code) {
            (true, _) => 200,
            (false, Some(code)) => code.http_status(),
            (false, None) => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StepFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl StepFailure {
    pub(crate) fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Bookkeeping for a pass in progress.
pub(crate) struct Pass {
    steps: Vec<VerificationStep>,
    current: Option<usize>,
    pub proof_data: Option<ProofData>,
    pub live_proof_checked: bool,
}

impl Pass {
    pub(crate) fn new(plan: &[StepKind]) -> Self {
        Self {
            steps: plan
                .iter()
                .map(|kind| VerificationStep {
                    name: *kind,
                    status: StepStatus::Pending,
                    message: None,
                })
                .collect(),
            current: None,
            proof_data: None,
            live_proof_checked: false,
        }
    }

    pub(crate) fn begin(&mut self, kind: StepKind) {
        self.current = self.steps.iter().position(|step| step.name == kind);
        if let Some(step) = self.current.and_then(|index| self.steps.get_mut(index)) {
            step.status = StepStatus::Running;
        }
        debug!(target: VERIFIER_TARGET, step = ?kind, "Step started");
    }

    pub(crate) fn succeed(&mut self, message: impl Into<String>) {
        if let Some(step) = self.current.take().and_then(|index| self.steps.get_mut(index)) {
            step.status = StepStatus::Success;
            step.message = Some(message.into());
            debug!(target: VERIFIER_TARGET, step = ?step.name, message = ?step.message, "Step succeeded");
        }
    }

    pub(crate) fn attach_signature(&mut self, audit: SignatureAudit) {
        if let Some(proof_data) = &mut self.proof_data {
            proof_data.signature = Some(audit);
        }
    }

    pub(crate) fn finish(mut self, result: Result<(), StepFailure>) -> VerificationOutcome {
        let error_code = match result {
            Ok(()) if self.steps.iter().all(|step| step.status == StepStatus::Success) => None,
            Ok(()) => Some(ErrorCode::InternalError),
            Err(failure) => {
                if let Some(step) = self.current.take().and_then(|index| self.steps.get_mut(index)) {
                    step.status = StepStatus::Error;
                    step.message = Some(failure.message);
                    debug!(target: VERIFIER_TARGET, step = ?step.name, code = %failure.code, "Step failed");
                }
                Some(failure.code)
            }
        };

        VerificationOutcome {
            steps: self.steps,
            verified: error_code.is_none(),
            error_code,
            proof_data: self.proof_data,
            live_proof_checked: self.live_proof_checked,
        }
    }
}
