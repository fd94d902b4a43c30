use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::errors::{DataConversionError, KeyTypeError};

pub mod public_key;
pub mod signature;

pub const ED25519_PUBLIC_KEY_LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;
pub const ED25519_SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyType {
    ED25519 = 0,
    SECP256K1 = 1,
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.write_str(match self {
            Self::ED25519 => "ed25519",
            Self::SECP256K1 => "secp256k1",
        })
    }
}

impl FromStr for KeyType {
    type Err = KeyTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowercase_key_type = value.to_ascii_lowercase();
        match lowercase_key_type.as_str() {
            "ed25519" => Ok(Self::ED25519),
            "secp256k1" => Ok(Self::SECP256K1),
            _ => Err(KeyTypeError::InvalidKeyFormat(lowercase_key_type)),
        }
    }
}

/// Splits `"<curve>:<data>"`. Unlike transaction keys, the prefix is mandatory here.
fn split_key_type_data(value: &str) -> Result<(KeyType, &str), DataConversionError> {
    let (prefix, key_data) = value
        .split_once(':')
        .ok_or(DataConversionError::MissingKeyPrefix)?;
    Ok((KeyType::from_str(prefix)?, key_data))
}
