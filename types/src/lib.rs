//! Building blocks for verifying that a NEAR account owns a passport-backed identity.
//!
//! - [`nep413`]: the NEP-413 message codec and ed25519 signature verifier
//! - [`context`]: recovery of a signature bundle from Self.xyz user context data
//! - [`proof`]: Groth16 proof and Self.xyz verification result types
//! - [`errors`]: error types and the [`ErrorCode`](errors::ErrorCode) taxonomy shared with callers
//!
//! Everything in this crate is synchronous and free of I/O.

use sha2::Digest;
use std::fmt;

pub mod context;
pub mod crypto;
pub mod errors;
pub mod nep413;
pub mod proof;

pub use context::NearSignatureBundle;
pub use crypto::public_key::ED25519PublicKey;
pub use crypto::signature::ED25519Signature;
pub use errors::ErrorCode;
pub use near_account_id::AccountId;
pub use proof::{AttestationId, ProofVerification, ZkProof};

use crate::errors::DataConversionError;

/// A SHA-256 digest.
#[derive(
    Copy,
    Clone,
    Default,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    serde::Serialize,
    serde::Deserialize,
    borsh::BorshDeserialize,
    borsh::BorshSerialize,
)]
pub struct CryptoHash(pub [u8; 32]);

impl CryptoHash {
    pub fn hash(bytes: &[u8]) -> Self {
        Self(sha2::Sha256::digest(bytes).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::str::FromStr for CryptoHash {
    type Err = DataConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec()?;
        Self::try_from(bytes)
    }
}

impl TryFrom<&[u8]> for CryptoHash {
    type Error = DataConversionError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 32 {
            return Err(DataConversionError::IncorrectLength(bytes.len()));
        }
        let mut buf = [0; 32];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

impl TryFrom<Vec<u8>> for CryptoHash {
    type Error = DataConversionError;

    fn try_from(v: Vec<u8>) -> Result<Self, Self::Error> {
        <Self as TryFrom<&[u8]>>::try_from(v.as_ref())
    }
}

impl fmt::Debug for CryptoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for CryptoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&bs58::encode(self.0).into_string(), f)
    }
}
