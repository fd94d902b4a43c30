pub use near_passport_types::errors::{
    ContextParseError, DataConversionError, ErrorCode, Nep413Error, ProofFormatError,
};

#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    #[error("No RPC endpoints are defined in the network config")]
    NoRpcEndpoints,
    #[error("Request failed. Retries exhausted. Last error: {0}")]
    RetriesExhausted(E),
    #[error("Critical error: {0}")]
    Critical(E),
}

/// Errors reported by the verification contract client.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Account is already verified")]
    AccountAlreadyVerified,
    #[error("Identity nullifier is already bound to another account")]
    DuplicateIdentity,
    /// Transport or node failure. The only variant worth retrying.
    #[error("Contract is unavailable: {0}")]
    Unavailable(String),
    #[error("Contract rejected the call: {0}")]
    Rejected(String),
}

impl ContractError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<RetryError<ContractError>> for ContractError {
    fn from(err: RetryError<ContractError>) -> Self {
        match err {
            RetryError::NoRpcEndpoints => Self::Unavailable("no endpoints configured".to_string()),
            RetryError::RetriesExhausted(err) | RetryError::Critical(err) => err,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProofServiceError {
    #[error("Proof verifier is unavailable: {0}")]
    Unavailable(String),
    #[error("Proof verifier returned an unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(thiserror::Error, Debug)]
pub enum NonceStoreError {
    #[error("Nonce store is unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AccessKeyError {
    #[error("Failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {name}: {message}")]
    Rpc { name: String, message: String },
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Access key query failed: {0}")]
    Query(Box<RetryError<AccessKeyError>>),
}

impl From<RetryError<AccessKeyError>> for AccessKeyError {
    fn from(err: RetryError<AccessKeyError>) -> Self {
        Self::Query(Box::new(err))
    }
}

impl AccessKeyError {
    /// Transport failures and node-side hiccups may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.status().is_none_or(|status| {
                status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }),
            Self::Rpc { name, .. } => matches!(
                name.as_str(),
                "INTERNAL_ERROR" | "TIMEOUT_ERROR" | "NO_SYNCED_BLOCKS" | "NOT_SYNCED_YET"
            ),
            Self::UnexpectedResponse(_) | Self::Query(_) => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
