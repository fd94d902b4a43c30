//! NEP-413: Near Wallet API - support for signMessage method
//!
//! This module reconstructs the exact bytes a NEAR wallet signs when asked to
//! sign a [NEP-413](https://github.com/near/NEPs/blob/master/neps/nep-0413.md) message,
//! and verifies ed25519 signatures over them.
//!
//! The signed hash is
//!
//! ```text
//! SHA256(LE_U32(2^31 + 413) || borsh(Payload { message, nonce, recipient, callback_url }))
//! ```
//!
//! # Example
//!
//! ```rust
//! use near_passport_types::nep413;
//!
//! let nonce = [0u8; 32];
//! let hash = nep413::compute_hash("Identify myself", &nonce, "alice.near").unwrap();
//! assert_eq!(
//!     hash.to_hex(),
//!     "1cc84a5ab99cdc7f88042383a239617018a662d8a29c9d3ced63a5f8451e07a5"
//! );
//!
//! // Verification never fails loudly, it reports why the signature was rejected.
//! let result = nep413::verify(
//!     "Identify myself",
//!     "not-a-signature",
//!     "ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp",
//!     &nonce,
//!     "alice.near",
//! );
//! assert!(!result.valid);
//! assert!(result.error.is_some());
//! ```

use base64::prelude::*;
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    CryptoHash,
    crypto::{public_key::ED25519PublicKey, signature::ED25519Signature},
    errors::Nep413Error,
};

/// The NEP-413 discriminant prefix: 2^31 + 413
pub const NEP413_SIGN_MESSAGE_PREFIX: u32 = (1u32 << 31) + 413;

pub const NONCE_LENGTH: usize = 32;

/// The tag that namespaces NEP-413 signatures away from transaction signatures.
pub const fn encode_tag() -> [u8; 4] {
    NEP413_SIGN_MESSAGE_PREFIX.to_le_bytes()
}

/// The payload structure for NEP-413 messages (input to signMessage).
///
/// ```text
/// struct Payload {
///   message: string;
///   nonce: [u8; 32];
///   recipient: string;
///   callbackUrl?: string;
/// }
/// ```
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Payload {
    /// The message that wants to be transmitted.
    pub message: String,
    /// A nonce that uniquely identifies this instance of the message, denoted as a 32 bytes array.
    /// The first 8 bytes can optionally contain a timestamp (ms since epoch) as big-endian uint64.
    pub nonce: [u8; NONCE_LENGTH],
    /// The recipient to whom the message is destined. Here it is always the signing account.
    pub recipient: String,
    /// Always `None` for passport verification challenges.
    pub callback_url: Option<String>,
}

impl Payload {
    /// Builds a payload from an untrusted nonce slice.
    ///
    /// The nonce is never padded or truncated.
    pub fn new(
        message: impl Into<String>,
        nonce: &[u8],
        recipient: impl Into<String>,
    ) -> Result<Self, Nep413Error> {
        let nonce: [u8; NONCE_LENGTH] = nonce
            .try_into()
            .map_err(|_| Nep413Error::InvalidNonceLength(nonce.len()))?;
        Ok(Self {
            message: message.into(),
            nonce,
            recipient: recipient.into(),
            callback_url: None,
        })
    }

    /// Borsh bytes of the payload, without the tag.
    pub fn serialize(&self) -> Result<Vec<u8>, Nep413Error> {
        Ok(borsh::to_vec(self)?)
    }

    /// Compute the hash that should be signed for this payload.
    ///
    /// 1. Borsh serialize the payload
    /// 2. Prepend the 4-byte Borsh representation of 2^31 + 413 (the NEP-413 tag)
    /// 3. Compute SHA-256 hash of the combined bytes
    pub fn compute_hash(&self) -> Result<CryptoHash, Nep413Error> {
        let mut bytes = encode_tag().to_vec();
        borsh::to_writer(&mut bytes, self)?;
        Ok(CryptoHash::hash(&bytes))
    }

    /// Verify a signature against this payload.
    ///
    /// The signature can be provided as:
    /// - Base64 encoded string (no prefix) - as returned by wallets per NEP-413
    /// - Base58 encoded string with the "ed25519:" prefix
    ///
    /// Returns `Ok(true)` if the signature is valid, `Ok(false)` if invalid,
    /// or an error if the signature or key format is invalid.
    pub fn verify_signature(
        &self,
        signature_str: &str,
        public_key: &ED25519PublicKey,
    ) -> Result<bool, Nep413Error> {
        let signature = parse_signature(signature_str)?;
        let hash = self.compute_hash()?;
        Ok(signature.verify(&hash.0, public_key))
    }

    /// Extract the timestamp from the nonce if present.
    ///
    /// Interprets the first 8 bytes as a big-endian millisecond timestamp. The caller
    /// decides whether a timestamp is expected there at all.
    pub fn extract_timestamp_from_nonce(&self) -> u64 {
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&self.nonce[..8]);
        u64::from_be_bytes(timestamp)
    }
}

/// Borsh serialization of `{message, nonce, recipient, callback_url}`.
pub fn serialize_payload(
    message: &str,
    nonce: &[u8],
    recipient: &str,
    callback_url: Option<&str>,
) -> Result<Vec<u8>, Nep413Error> {
    let mut payload = Payload::new(message, nonce, recipient)?;
    payload.callback_url = callback_url.map(str::to_owned);
    payload.serialize()
}

/// `SHA256(tag || serialize_payload(message, nonce, recipient, None))`.
pub fn compute_hash(message: &str, nonce: &[u8], recipient: &str) -> Result<CryptoHash, Nep413Error> {
    Payload::new(message, nonce, recipient)?.compute_hash()
}

/// Hex form of [`compute_hash`], for re-checking a proof with external tools.
pub fn compute_nep413_hash_hex(
    message: &str,
    nonce: &[u8],
    recipient: &str,
) -> Result<String, Nep413Error> {
    Ok(compute_hash(message, nonce, recipient)?.to_hex())
}

/// Strips the `ed25519:` prefix and returns the raw 32 key bytes as hex.
pub fn extract_ed25519_public_key_hex(public_key: &str) -> Result<String, Nep413Error> {
    public_key
        .parse::<ED25519PublicKey>()
        .map(|key| key.to_hex())
        .map_err(Nep413Error::PublicKeyParsing)
}

/// Represents a nonce that can be deserialized from either:
/// - A JSON array of numbers (e.g., `[0, 1, 2, ..., 31]`) - common from JavaScript Uint8Array
/// - A base64-encoded string (e.g., `"AAAAAAA..."`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_LENGTH]);

impl Nonce {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }
}

impl serde::Serialize for Nonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> serde::Deserialize<'de> for Nonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct NonceVisitor;

        impl<'de> Visitor<'de> for NonceVisitor {
            type Value = Nonce;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a 32-byte nonce as either a base64 string or array of numbers")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let bytes = BASE64_STANDARD
                    .decode(value)
                    .map_err(|e| de::Error::custom(format!("invalid base64: {}", e)))?;
                let arr: [u8; NONCE_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
                    de::Error::custom(format!("expected 32 bytes, got {}", v.len()))
                })?;
                Ok(Nonce(arr))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut arr = [0u8; NONCE_LENGTH];
                for (i, byte) in arr.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &"32 bytes"))?;
                }
                if seq.next_element::<u8>()?.is_some() {
                    return Err(de::Error::invalid_length(33, &"32 bytes"));
                }
                Ok(Nonce(arr))
            }
        }

        deserializer.deserialize_any(NonceVisitor)
    }
}

impl From<[u8; NONCE_LENGTH]> for Nonce {
    fn from(arr: [u8; NONCE_LENGTH]) -> Self {
        Self(arr)
    }
}

impl From<Nonce> for [u8; NONCE_LENGTH] {
    fn from(nonce: Nonce) -> Self {
        nonce.0
    }
}

/// Parse a signature from either base64 (no prefix) or base58 with prefix format.
///
/// NEP-413 specifies that signatures are returned as base64-encoded strings.
/// However, some implementations use the NEAR-standard base58 with prefix format.
pub fn parse_signature(signature_str: &str) -> Result<ED25519Signature, Nep413Error> {
    if signature_str.contains(':') {
        return signature_str
            .parse::<ED25519Signature>()
            .map_err(Nep413Error::SignatureParsing);
    }

    let sig_bytes = BASE64_STANDARD
        .decode(signature_str.trim())
        .map_err(Nep413Error::Base64Decode)?;

    ED25519Signature::from_bytes(&sig_bytes).map_err(Nep413Error::SignatureParsing)
}

/// Outcome of [`verify`]: `valid` is only set when the cryptographic check passed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignatureVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignatureVerification {
    fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(error: impl ToString) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
        }
    }
}

/// Decides whether `signature_base64` authenticates `challenge` for `recipient`.
///
/// Total: every malformed input is reported through [`SignatureVerification::error`].
pub fn verify(
    challenge: &str,
    signature_base64: &str,
    public_key: &str,
    nonce: &[u8],
    recipient: &str,
) -> SignatureVerification {
    let payload = match Payload::new(challenge, nonce, recipient) {
        Ok(payload) => payload,
        Err(err) => return SignatureVerification::invalid(err),
    };
    let public_key = match public_key.parse::<ED25519PublicKey>() {
        Ok(key) => key,
        Err(err) => return SignatureVerification::invalid(Nep413Error::PublicKeyParsing(err)),
    };
    match payload.verify_signature(signature_base64, &public_key) {
        Ok(true) => SignatureVerification::valid(),
        Ok(false) => SignatureVerification::invalid("Signature does not match the challenge"),
        Err(err) => SignatureVerification::invalid(err),
    }
}
