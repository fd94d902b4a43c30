use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum KeyTypeError {
    #[error("Invalid key format. Expected: [ed25519, secp256k1] but got: {0}")]
    InvalidKeyFormat(String),
    #[error("Unsupported key type: {0}. Only ed25519 keys can sign NEP-413 challenges")]
    UnsupportedKeyType(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DataConversionError {
    #[error("Base64 decoding error: {0}")]
    Base64DecodingError(#[from] base64::DecodeError),
    #[error("Base58 decoding error: {0}")]
    Base58DecodingError(#[from] bs58::decode::Error),
    #[error("Hex decoding error: {0}")]
    HexDecodingError(#[from] hex::FromHexError),
    #[error("Borsh serialization error: {0}")]
    BorshError(#[from] borsh::io::Error),
    #[error("Incorrect length: {0}")]
    IncorrectLength(usize),
    #[error("Invalid key: {0}")]
    InvalidKeyFormat(#[from] KeyTypeError),
    #[error("Missing `ed25519:` prefix in public key")]
    MissingKeyPrefix,
    #[error("Public key is not a valid ed25519 curve point")]
    InvalidCurvePoint,
}

impl From<Vec<u8>> for DataConversionError {
    fn from(value: Vec<u8>) -> Self {
        Self::IncorrectLength(value.len())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Nep413Error {
    #[error("Nonce must be exactly 32 bytes, got {0}")]
    InvalidNonceLength(usize),
    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] borsh::io::Error),
    #[error("Invalid public key: {0}")]
    PublicKeyParsing(DataConversionError),
    #[error("Invalid signature: {0}")]
    SignatureParsing(DataConversionError),
    #[error("Failed to decode base64 signature: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Reasons why a user-context-data blob did not yield a signature bundle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextParseError {
    #[error("User context data is empty")]
    Empty,
    #[error("Unsupported user context data representation: {0}")]
    UnsupportedShape(&'static str),
    #[error("Byte value out of range at index {0}")]
    ByteOutOfRange(usize),
    #[error("No JSON object found in user context data")]
    NoJsonObject,
    #[error("User context data is not valid UTF-8")]
    InvalidUtf8,
    #[error("Invalid JSON in user context data: {0}")]
    InvalidJson(String),
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),
    #[error("Field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofFormatError {
    #[error("Unknown attestation id: {0}")]
    UnknownAttestationId(u8),
    #[error("Proof component `{component}` is {len} characters long, limit is {max}")]
    ComponentTooLong {
        component: &'static str,
        len: usize,
        max: usize,
    },
    #[error("Proof component `{0}` is not a decimal field element")]
    NotDecimal(&'static str),
    #[error("Too many public signals: {0}, limit is {max}", max = crate::proof::MAX_PUBLIC_SIGNALS)]
    TooManySignals(usize),
}

/// Error codes surfaced to callers of the verification flow.
///
/// The string form is stable and is what HTTP handlers and UIs branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingFields,
    InvalidProofFormat,
    VerificationFailed,
    MinimumAgeNotMet,
    OfacCheckFailed,
    NullifierMissing,
    NearSignatureInvalid,
    NearSignatureMissing,
    SignatureExpired,
    SignatureTimestampInvalid,
    KeyNotAuthorized,
    NonceInvalid,
    NonceAlreadyUsed,
    #[serde(alias = "DUPLICATE_PASSPORT")]
    DuplicateIdentity,
    AccountAlreadyVerified,
    NotFound,
    StorageFailed,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingFields => "MISSING_FIELDS",
            Self::InvalidProofFormat => "INVALID_PROOF_FORMAT",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::MinimumAgeNotMet => "MINIMUM_AGE_NOT_MET",
            Self::OfacCheckFailed => "OFAC_CHECK_FAILED",
            Self::NullifierMissing => "NULLIFIER_MISSING",
            Self::NearSignatureInvalid => "NEAR_SIGNATURE_INVALID",
            Self::NearSignatureMissing => "NEAR_SIGNATURE_MISSING",
            Self::SignatureExpired => "SIGNATURE_EXPIRED",
            Self::SignatureTimestampInvalid => "SIGNATURE_TIMESTAMP_INVALID",
            Self::KeyNotAuthorized => "KEY_NOT_AUTHORIZED",
            Self::NonceInvalid => "NONCE_INVALID",
            Self::NonceAlreadyUsed => "NONCE_ALREADY_USED",
            Self::DuplicateIdentity => "DUPLICATE_IDENTITY",
            Self::AccountAlreadyVerified => "ACCOUNT_ALREADY_VERIFIED",
            Self::NotFound => "NOT_FOUND",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a handler should answer with for this code.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MissingFields | Self::InvalidProofFormat | Self::NearSignatureMissing => 400,
            Self::VerificationFailed
            | Self::NullifierMissing
            | Self::NearSignatureInvalid
            | Self::SignatureExpired
            | Self::SignatureTimestampInvalid
            | Self::KeyNotAuthorized
            | Self::NonceInvalid => 401,
            Self::MinimumAgeNotMet | Self::OfacCheckFailed => 403,
            Self::NotFound => 404,
            Self::NonceAlreadyUsed | Self::DuplicateIdentity | Self::AccountAlreadyVerified => 409,
            Self::StorageFailed | Self::InternalError => 500,
        }
    }

    /// Whether the caller may retry the whole flow and expect a different answer.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StorageFailed | Self::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ContextParseError> for ErrorCode {
    fn from(_: &ContextParseError) -> Self {
        Self::NearSignatureMissing
    }
}

impl From<&ProofFormatError> for ErrorCode {
    fn from(_: &ProofFormatError) -> Self {
        Self::InvalidProofFormat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_to_stable_strings() {
        for code in [
            ErrorCode::MissingFields,
            ErrorCode::NearSignatureInvalid,
            ErrorCode::SignatureTimestampInvalid,
            ErrorCode::DuplicateIdentity,
            ErrorCode::AccountAlreadyVerified,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            assert_eq!(code.to_string(), code.as_str());
        }
    }

    #[test]
    fn duplicate_passport_is_accepted_as_alias() {
        let code: ErrorCode = serde_json::from_str("\"DUPLICATE_PASSPORT\"").unwrap();
        assert_eq!(code, ErrorCode::DuplicateIdentity);
    }

    #[test]
    fn only_infra_codes_are_transient() {
        assert!(ErrorCode::StorageFailed.is_transient());
        assert!(!ErrorCode::NonceAlreadyUsed.is_transient());
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
    }
}
