//! Self.xyz proof types.
//!
//! A [`ZkProof`] is a Groth16 proof whose field elements travel as decimal strings.
//! The contract stores proofs verbatim, so their size is bounded before anything is
//! sent to the verifier or written on-chain.

use serde::{Deserialize, Serialize};

use crate::errors::ProofFormatError;

/// Longest decimal field element the contract accepts.
pub const MAX_COMPONENT_LENGTH: usize = 80;
/// Most public signals the contract accepts.
pub const MAX_PUBLIC_SIGNALS: usize = 21;

/// Document type the proof was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AttestationId {
    Passport = 1,
    BiometricIdCard = 2,
    Aadhaar = 3,
}

impl TryFrom<u8> for AttestationId {
    type Error = ProofFormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Passport),
            2 => Ok(Self::BiometricIdCard),
            3 => Ok(Self::Aadhaar),
            unknown => Err(ProofFormatError::UnknownAttestationId(unknown)),
        }
    }
}

impl From<AttestationId> for u8 {
    fn from(value: AttestationId) -> Self {
        value as u8
    }
}

/// Groth16 proof `{a, b, c}` with decimal-string field elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    pub a: [String; 2],
    pub b: [[String; 2]; 2],
    pub c: [String; 2],
}

impl ZkProof {
    fn components(&self) -> [(&'static str, &str); 8] {
        [
            ("a[0]", self.a[0].as_str()),
            ("a[1]", self.a[1].as_str()),
            ("b[0][0]", self.b[0][0].as_str()),
            ("b[0][1]", self.b[0][1].as_str()),
            ("b[1][0]", self.b[1][0].as_str()),
            ("b[1][1]", self.b[1][1].as_str()),
            ("c[0]", self.c[0].as_str()),
            ("c[1]", self.c[1].as_str()),
        ]
    }

    /// Checks that every component is a decimal string within the storage bound.
    pub fn validate(&self) -> Result<(), ProofFormatError> {
        for (component, value) in self.components() {
            validate_field_element(component, value)?;
        }
        Ok(())
    }
}

pub fn validate_public_signals(signals: &[String]) -> Result<(), ProofFormatError> {
    if signals.len() > MAX_PUBLIC_SIGNALS {
        return Err(ProofFormatError::TooManySignals(signals.len()));
    }
    signals
        .iter()
        .try_for_each(|signal| validate_field_element("publicSignals", signal))
}

fn validate_field_element(component: &'static str, value: &str) -> Result<(), ProofFormatError> {
    if value.len() > MAX_COMPONENT_LENGTH {
        return Err(ProofFormatError::ComponentTooLong {
            component,
            len: value.len(),
            max: MAX_COMPONENT_LENGTH,
        });
    }
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProofFormatError::NotDecimal(component));
    }
    Ok(())
}

/// Result returned by the Self.xyz verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerification {
    pub is_valid_details: ValidityDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclose_output: Option<DiscloseOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityDetails {
    pub is_valid: bool,
    /// Absent means the age requirement was not proven.
    #[serde(default)]
    pub is_minimum_age_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ofac_valid: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscloseOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_age: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default)]
    pub user_identifier: String,
    #[serde(default)]
    pub user_defined_data: String,
}

impl ProofVerification {
    /// The identity nullifier, if the proof disclosed a non-empty one.
    pub fn nullifier(&self) -> Option<&str> {
        self.disclose_output
            .as_ref()
            .and_then(|output| output.nullifier.as_deref())
            .filter(|nullifier| !nullifier.is_empty())
    }

    /// OFAC only fails when the verifier explicitly reported a match.
    pub fn is_ofac_rejected(&self) -> bool {
        self.is_valid_details.is_ofac_valid == Some(false)
    }

    pub fn user_identifier(&self) -> Option<&str> {
        self.user_data
            .as_ref()
            .map(|data| data.user_identifier.as_str())
            .filter(|id| !id.is_empty())
    }
}
