//! Key liveness: is the key that signed the challenge still a full access key
//! of the account?
//!
//! NEP-413 requires messages to be signed with full access keys. A key that was
//! deleted after signing, or a function-call key, does not authorize the account.

use std::time::Duration;

use near_openapi_types::{AccessKeyPermissionView, RpcQueryResponse};
use near_passport_types::{AccountId, ED25519PublicKey};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    config::{NetworkConfig, RetryResponse, retry_endpoints},
    errors::{AccessKeyError, ConfigError},
};

const ACCESS_KEY_TARGET: &str = "near_passport::access_key";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait::async_trait]
pub trait AccessKeyChecker: Send + Sync {
    /// `Ok(false)` if the key is unknown to the account or is not a full access key.
    async fn has_full_access_key(
        &self,
        account_id: &AccountId,
        public_key: &ED25519PublicKey,
    ) -> Result<bool, AccessKeyError>;
}

/// Asks NEAR JSON-RPC (`query` / `view_access_key`) at final finality.
#[derive(Debug, Clone)]
pub struct RpcAccessKeyChecker {
    network: NetworkConfig,
    client: reqwest::Client,
}

impl RpcAccessKeyChecker {
    pub fn new(network: NetworkConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(network, client))
    }

    pub const fn with_client(network: NetworkConfig, client: reqwest::Client) -> Self {
        Self { network, client }
    }

    pub const fn network(&self) -> &NetworkConfig {
        &self.network
    }
}

#[async_trait::async_trait]
impl AccessKeyChecker for RpcAccessKeyChecker {
    #[instrument(skip(self), fields(account_id = %account_id, public_key = %public_key, network = %self.network.network_name))]
    async fn has_full_access_key(
        &self,
        account_id: &AccountId,
        public_key: &ED25519PublicKey,
    ) -> Result<bool, AccessKeyError> {
        let body = view_access_key_request(account_id, public_key);

        let is_full_access = retry_endpoints(&self.network, |endpoint| {
            let request = self.client.post(endpoint.url.clone()).json(&body);
            let request = match &endpoint.api_key {
                Some(api_key) => request.header("x-api-key", api_key),
                None => request,
            };
            async move {
                match send_query(request).await {
                    Ok(found) => RetryResponse::Ok(found),
                    Err(err) if err.is_transient() => RetryResponse::Retry(err),
                    Err(err) => RetryResponse::Critical(err),
                }
            }
        })
        .await?;

        debug!(target: ACCESS_KEY_TARGET, is_full_access, "Access key checked");
        Ok(is_full_access)
    }
}

fn view_access_key_request(account_id: &AccountId, public_key: &ED25519PublicKey) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": "dontcare",
        "method": "query",
        "params": {
            "request_type": "view_access_key",
            "finality": "final",
            "account_id": account_id,
            "public_key": public_key.to_string(),
        }
    })
}

async fn send_query(request: reqwest::RequestBuilder) -> Result<bool, AccessKeyError> {
    let response: Value = request.send().await?.error_for_status()?.json().await?;
    interpret_access_key_response(&response)
}

fn is_missing_key_message(message: &str) -> bool {
    message.contains("UnknownAccessKey")
        || message.contains("does not exist")
        || message.contains("AccessKeyDoesNotExist")
        || message.contains("has never been observed")
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decides key liveness from a `view_access_key` JSON-RPC response body.
///
/// A missing key or account is an answer (`false`), not an error.
pub fn interpret_access_key_response(response: &Value) -> Result<bool, AccessKeyError> {
    if let Some(error) = response.get("error") {
        let name = error
            .pointer("/cause/name")
            .or_else(|| error.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let message = text_of(error.get("data"))
            .or_else(|| text_of(error.get("message")))
            .unwrap_or_default();

        if matches!(name.as_str(), "UNKNOWN_ACCESS_KEY" | "UNKNOWN_ACCOUNT")
            || is_missing_key_message(&message)
        {
            return Ok(false);
        }
        return Err(AccessKeyError::Rpc { name, message });
    }

    let result = response
        .get("result")
        .ok_or_else(|| AccessKeyError::UnexpectedResponse("missing `result`".to_string()))?;

    // Older nodes answer a failed view with a successful envelope.
    if let Some(message) = result.get("error").and_then(Value::as_str) {
        if is_missing_key_message(message) {
            return Ok(false);
        }
        return Err(AccessKeyError::Rpc {
            name: "QUERY_ERROR".to_string(),
            message: message.to_string(),
        });
    }

    let response = RpcQueryResponse::deserialize(result)
        .map_err(|err| AccessKeyError::UnexpectedResponse(err.to_string()))?;
    if let RpcQueryResponse::Variant4 { permission, .. } = response {
        match permission {
            AccessKeyPermissionView::FullAccess => Ok(true),
            AccessKeyPermissionView::FunctionCall { .. } => Ok(false),
        }
    } else {
        warn!(target: ACCESS_KEY_TARGET, "Unexpected response kind: {:?}", response);
        Err(AccessKeyError::UnexpectedResponse(
            "expected an access key view".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_access_key_is_live() {
        let response = json!({
            "jsonrpc": "2.0",
            "id": "dontcare",
            "result": {
                "nonce": 85,
                "permission": "FullAccess",
                "block_height": 19884918,
                "block_hash": "GGJQ8yjmo7aEoj8ZpAhGehnq9BSWFx4xswHYzDwwAP2n"
            }
        });
        assert!(interpret_access_key_response(&response).unwrap());
    }

    #[test]
    fn function_call_key_is_not_live() {
        let response = json!({
            "result": {
                "nonce": 1,
                "block_height": 19884918,
                "block_hash": "GGJQ8yjmo7aEoj8ZpAhGehnq9BSWFx4xswHYzDwwAP2n",
                "permission": {
                    "FunctionCall": {
                        "allowance": "250000000000000000000000",
                        "receiver_id": "app.near",
                        "method_names": []
                    }
                }
            }
        });
        assert!(!interpret_access_key_response(&response).unwrap());
    }

    #[test]
    fn unknown_key_or_account_is_not_live() {
        let unknown_key = json!({
            "error": {
                "name": "HANDLER_ERROR",
                "cause": { "name": "UNKNOWN_ACCESS_KEY", "info": {} },
                "code": -32000,
                "message": "Server error",
                "data": "Access key for public key ed25519:... has never been observed on the node"
            }
        });
        assert!(!interpret_access_key_response(&unknown_key).unwrap());

        let unknown_account = json!({
            "error": { "name": "HANDLER_ERROR", "cause": { "name": "UNKNOWN_ACCOUNT" } }
        });
        assert!(!interpret_access_key_response(&unknown_account).unwrap());

        let legacy = json!({
            "result": {
                "error": "access key ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp does not exist while viewing",
                "logs": []
            }
        });
        assert!(!interpret_access_key_response(&legacy).unwrap());
    }

    #[test]
    fn node_failures_are_errors() {
        let internal = json!({
            "error": {
                "name": "INTERNAL_ERROR",
                "cause": { "name": "INTERNAL_ERROR" },
                "data": "storage error"
            }
        });
        let err = interpret_access_key_response(&internal).unwrap_err();
        assert!(err.is_transient());

        let invalid = json!({
            "error": {
                "name": "REQUEST_VALIDATION_ERROR",
                "cause": { "name": "PARSE_ERROR" },
                "data": "invalid public key"
            }
        });
        let err = interpret_access_key_response(&invalid).unwrap_err();
        assert!(!err.is_transient());

        assert!(matches!(
            interpret_access_key_response(&json!({"jsonrpc": "2.0"})),
            Err(AccessKeyError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn unrecognized_permission_is_an_error() {
        let response = json!({
            "result": {
                "nonce": 1,
                "block_height": 19884918,
                "block_hash": "GGJQ8yjmo7aEoj8ZpAhGehnq9BSWFx4xswHYzDwwAP2n",
                "permission": "Delegated"
            }
        });
        assert!(matches!(
            interpret_access_key_response(&response),
            Err(AccessKeyError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn request_targets_view_access_key() {
        let public_key: ED25519PublicKey = "ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp"
            .parse()
            .unwrap();
        let request = view_access_key_request(&"alice.near".parse().unwrap(), &public_key);
        assert_eq!(request["method"], "query");
        assert_eq!(request["params"]["request_type"], "view_access_key");
        assert_eq!(request["params"]["account_id"], "alice.near");
        assert_eq!(
            request["params"]["public_key"],
            "ed25519:6E8sCci9badyRkXb3JoRpBj5p8C6Tw41ELDZoiihKEtp"
        );
    }
}
