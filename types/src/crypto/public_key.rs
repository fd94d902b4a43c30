use std::{
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use crate::{
    crypto::{ED25519_PUBLIC_KEY_LENGTH, KeyType, split_key_type_data},
    errors::{DataConversionError, KeyTypeError},
};

/// An ed25519 public key in NEAR string form, `ed25519:<base58>`.
///
/// NEP-413 challenges in this system are only ever signed with ed25519 full access
/// keys, so other curves are rejected while parsing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ED25519PublicKey(pub [u8; ED25519_PUBLIC_KEY_LENGTH]);

impl ED25519PublicKey {
    pub const fn key_type(&self) -> KeyType {
        KeyType::ED25519
    }

    pub const fn key_data(&self) -> &[u8; ED25519_PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Raw key bytes as lowercase hex, the form external verifiers expect.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey, DataConversionError> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| DataConversionError::InvalidCurvePoint)
    }
}

impl TryFrom<&[u8]> for ED25519PublicKey {
    type Error = DataConversionError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(data.try_into().map_err(|_| {
            DataConversionError::IncorrectLength(data.len())
        })?))
    }
}

impl FromStr for ED25519PublicKey {
    type Err = DataConversionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (key_type, key_data) = split_key_type_data(value.trim())?;
        match key_type {
            KeyType::ED25519 => Ok(Self(bs58::decode(key_data).into_vec()?.try_into()?)),
            KeyType::SECP256K1 => Err(KeyTypeError::UnsupportedKeyType(key_type.to_string()).into()),
        }
    }
}

impl Display for ED25519PublicKey {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{}:{}",
            KeyType::ED25519,
            bs58::encode(&self.0).into_string()
        )
    }
}

impl Debug for ED25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

impl serde::Serialize for ED25519PublicKey {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ED25519PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as serde::Deserializer<'de>>::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse()
            .map_err(|err: DataConversionError| serde::de::Error::custom(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp";

    #[test]
    fn display_roundtrips_through_from_str() {
        let key = ED25519PublicKey::from_str(KEY).unwrap();
        assert_eq!(key.to_string(), KEY);
        assert_eq!(key.to_hex().len(), 64);
    }

    #[test]
    fn secp256k1_keys_are_rejected() {
        // cspell:disable-next-line
        let err = ED25519PublicKey::from_str("secp256k1:qMoRgcoXai4mBPsdbHi1wfyxF9TdbPCF4qSDQTRP3TfescSRoUdSx6nmeQoN3aiwGzwMyGXAb1gUjBTv5AY8DXj")
            .unwrap_err();
        assert!(matches!(
            err,
            DataConversionError::InvalidKeyFormat(KeyTypeError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        // 31 bytes
        let short = format!("ed25519:{}", bs58::encode([7u8; 31]).into_string());
        assert!(matches!(
            ED25519PublicKey::from_str(&short),
            Err(DataConversionError::IncorrectLength(31))
        ));
    }

    #[test]
    fn invalid_base58_is_rejected() {
        assert!(matches!(
            ED25519PublicKey::from_str("ed25519:0OIl"),
            Err(DataConversionError::Base58DecodingError(_))
        ));
    }

    #[test]
    fn serde_uses_string_form() {
        let key: ED25519PublicKey = serde_json::from_str(&format!("\"{KEY}\"")).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), format!("\"{KEY}\""));
    }
}
