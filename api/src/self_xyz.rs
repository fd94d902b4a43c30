use std::time::Duration;

use near_passport_types::{AttestationId, ProofVerification, ZkProof};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::errors::{ConfigError, ProofServiceError};

const PROOF_TARGET: &str = "near_passport::self_xyz";

/// Checks a Self.xyz zero-knowledge proof.
#[async_trait::async_trait]
pub trait ProofVerifier: Send + Sync {
    /// An `Err` means the verifier could not answer. A proof it rejected comes back as
    /// `Ok` with `is_valid == false`.
    async fn verify(
        &self,
        attestation_id: AttestationId,
        proof: &ZkProof,
        public_signals: &[String],
        user_context_data: &str,
    ) -> Result<ProofVerification, ProofServiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    attestation_id: AttestationId,
    proof: &'a ZkProof,
    public_signals: &'a [String],
    user_context_data: &'a str,
}

/// Delegates to an HTTP service wrapping the Self.xyz backend verifier.
///
/// The service receives `{attestationId, proof, publicSignals, userContextData}` and
/// answers with the verifier's result JSON.
#[derive(Debug, Clone)]
pub struct HttpProofVerifier {
    url: url::Url,
    client: reqwest::Client,
}

impl HttpProofVerifier {
    pub fn new(url: url::Url, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub const fn with_client(url: url::Url, client: reqwest::Client) -> Self {
        Self { url, client }
    }
}

#[async_trait::async_trait]
impl ProofVerifier for HttpProofVerifier {
    #[instrument(skip_all, fields(attestation_id = ?attestation_id, url = %self.url))]
    async fn verify(
        &self,
        attestation_id: AttestationId,
        proof: &ZkProof,
        public_signals: &[String],
        user_context_data: &str,
    ) -> Result<ProofVerification, ProofServiceError> {
        let request = VerifyRequest {
            attestation_id,
            proof,
            public_signals,
            user_context_data,
        };
        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| ProofServiceError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProofServiceError::Unavailable(format!("{status}: {body}")));
        }

        let verification: ProofVerification = response
            .json()
            .await
            .map_err(|err| ProofServiceError::UnexpectedResponse(err.to_string()))?;
        debug!(
            target: PROOF_TARGET,
            is_valid = verification.is_valid_details.is_valid,
            "Proof verifier answered"
        );
        Ok(verification)
    }
}
