use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use base64::prelude::*;
use ed25519_dalek::Verifier;

use crate::{
    crypto::{ED25519_SIGNATURE_LENGTH, KeyType, public_key::ED25519PublicKey, split_key_type_data},
    errors::{DataConversionError, KeyTypeError},
};

/// An ed25519 signature over a NEP-413 hash.
#[derive(Clone, PartialEq, Eq)]
pub struct ED25519Signature(pub ed25519_dalek::Signature);

impl ED25519Signature {
    pub fn from_bytes(signature_data: &[u8]) -> Result<Self, DataConversionError> {
        let bytes = <&[u8; ED25519_SIGNATURE_LENGTH]>::try_from(signature_data)
            .map_err(|_| DataConversionError::IncorrectLength(signature_data.len()))?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(bytes)))
    }

    /// Wallets return NEP-413 signatures as plain base64.
    pub fn from_base64(value: &str) -> Result<Self, DataConversionError> {
        let bytes = BASE64_STANDARD.decode(value.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Verifies that this signature signs `data` with the given key.
    /// A key that does not decode to a curve point verifies nothing.
    pub fn verify(&self, data: &[u8], public_key: &ED25519PublicKey) -> bool {
        ed25519_dalek::VerifyingKey::from_bytes(&public_key.0)
            .is_ok_and(|public_key| public_key.verify(data, &self.0).is_ok())
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0.to_bytes())
    }
}

/// Some wallets answer with the NEAR-native `ed25519:<base58>` form instead of base64.
impl FromStr for ED25519Signature {
    type Err = DataConversionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (sig_type, sig_data) = split_key_type_data(value)?;
        match sig_type {
            KeyType::ED25519 => Self::from_bytes(&bs58::decode(sig_data).into_vec()?),
            KeyType::SECP256K1 => Err(KeyTypeError::UnsupportedKeyType(sig_type.to_string()).into()),
        }
    }
}

impl Display for ED25519Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{}:{}",
            KeyType::ED25519,
            bs58::encode(self.0.to_bytes()).into_string()
        )
    }
}

impl Debug for ED25519Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            ED25519Signature::from_bytes(&[1u8; 63]),
            Err(DataConversionError::IncorrectLength(63))
        ));
        assert!(matches!(
            ED25519Signature::from_base64(&BASE64_STANDARD.encode([1u8; 65])),
            Err(DataConversionError::IncorrectLength(65))
        ));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            ED25519Signature::from_base64("not-valid-base64!!!"),
            Err(DataConversionError::Base64DecodingError(_))
        ));
    }

    #[test]
    fn base58_and_base64_forms_agree() {
        let signature = ED25519Signature::from_bytes(&[3u8; 64]).unwrap();
        let reparsed: ED25519Signature = signature.to_string().parse().unwrap();
        assert_eq!(reparsed, signature);
        assert_eq!(
            ED25519Signature::from_base64(&signature.to_base64()).unwrap(),
            signature
        );
    }

    #[test]
    fn verifies_only_with_the_signing_key() {
        use ed25519_dalek::{Signer, SigningKey};

        let signer = SigningKey::from_bytes(&[1u8; 32]);
        let other = SigningKey::from_bytes(&[2u8; 32]);
        let signature = ED25519Signature(signer.sign(b"payload"));

        let signer_key = ED25519PublicKey(signer.verifying_key().to_bytes());
        let other_key = ED25519PublicKey(other.verifying_key().to_bytes());
        assert!(signature.verify(b"payload", &signer_key));
        assert!(!signature.verify(b"payload", &other_key));
        assert!(!signature.verify(b"payloaD", &signer_key));
    }
}
