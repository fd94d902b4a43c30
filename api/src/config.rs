use std::{sync::LazyLock, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::RetryError;

/// Message every wallet signs to bind an account to a passport proof.
pub const DEFAULT_CHALLENGE_MESSAGE: &str = "Identify myself";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Policy knobs of the verification flow.
pub struct VerifierConfig {
    /// The NEP-413 message the wallet must have signed.
    pub challenge_message: String,
    /// Plan an OFAC step and reject proofs the verifier flagged.
    pub require_ofac: bool,
    /// Plan a key liveness step when an access key checker is installed.
    pub check_key_liveness: bool,
    /// How long a reserved nonce stays reserved. Spans the KYC flow.
    pub nonce_ttl: Duration,
    /// Oldest wallet signature accepted at registration. `None` disables the check.
    pub max_signature_age: Option<Duration>,
    /// How far into the future a signature timestamp may lie.
    pub max_clock_skew: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            challenge_message: DEFAULT_CHALLENGE_MESSAGE.to_string(),
            require_ofac: false,
            check_key_liveness: true,
            nonce_ttl: Duration::from_secs(60 * 60),
            max_signature_age: Some(Duration::from_secs(60 * 60)),
            max_clock_skew: Duration::from_secs(60),
        }
    }
}

impl VerifierConfig {
    pub fn with_challenge_message(mut self, challenge_message: impl Into<String>) -> Self {
        self.challenge_message = challenge_message.into();
        self
    }

    pub const fn with_ofac(mut self, require_ofac: bool) -> Self {
        self.require_ofac = require_ofac;
        self
    }

    pub const fn with_key_liveness(mut self, check_key_liveness: bool) -> Self {
        self.check_key_liveness = check_key_liveness;
        self
    }

    pub const fn with_nonce_ttl(mut self, nonce_ttl: Duration) -> Self {
        self.nonce_ttl = nonce_ttl;
        self
    }

    pub const fn with_max_signature_age(mut self, max_signature_age: Option<Duration>) -> Self {
        self.max_signature_age = max_signature_age;
        self
    }

    pub const fn with_max_clock_skew(mut self, max_clock_skew: Duration) -> Self {
        self.max_clock_skew = max_clock_skew;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// How often, and how patiently, a failing call is repeated.
pub struct RetryPolicy {
    /// Number of attempts before giving up. Zero still makes one attempt.
    pub retries: u8,
    pub exponential_backoff: bool,
    pub factor: u8,
    pub initial_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            exponential_backoff: true,
            factor: 2,
            // 10ms, 20ms, 40ms, 80ms
            initial_sleep: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no sleeping.
    pub const fn none() -> Self {
        Self {
            retries: 1,
            exponential_backoff: false,
            factor: 1,
            initial_sleep: Duration::ZERO,
        }
    }

    pub const fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub const fn with_exponential_backoff(mut self, exponential_backoff: bool, factor: u8) -> Self {
        self.exponential_backoff = exponential_backoff;
        self.factor = factor;
        self
    }

    pub const fn with_initial_sleep(mut self, initial_sleep: Duration) -> Self {
        self.initial_sleep = initial_sleep;
        self
    }

    pub fn get_sleep_duration(&self, retry: usize) -> Duration {
        if self.exponential_backoff {
            let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
            self.initial_sleep
                .saturating_mul(u32::from(self.factor).saturating_pow(exponent))
        } else {
            self.initial_sleep
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A NEAR JSON-RPC endpoint together with the retry policy used against it.
pub struct RPCEndpoint {
    pub url: url::Url,
    /// Sent as the `x-api-key` header.
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub retry_policy: RetryPolicy,
}

impl RPCEndpoint {
    pub fn new(url: url::Url) -> Self {
        Self {
            url,
            api_key: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(MAINNET_RPC_URL.clone())
    }

    pub fn testnet() -> Self {
        Self::new(TESTNET_RPC_URL.clone())
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub const fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

// Parsed on first use.
static MAINNET_RPC_URL: LazyLock<url::Url> = LazyLock::new(|| {
    url::Url::parse("https://rpc.mainnet.near.org").expect("mainnet RPC url is valid")
});
static TESTNET_RPC_URL: LazyLock<url::Url> = LazyLock::new(|| {
    url::Url::parse("https://rpc.testnet.near.org").expect("testnet RPC url is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_name: String,
    /// Tried in order. The next endpoint is used once one exhausts its retries.
    pub rpc_endpoints: Vec<RPCEndpoint>,
}

impl NetworkConfig {
    pub fn mainnet() -> Self {
        Self {
            network_name: "mainnet".to_string(),
            rpc_endpoints: vec![RPCEndpoint::mainnet()],
        }
    }

    pub fn testnet() -> Self {
        Self {
            network_name: "testnet".to_string(),
            rpc_endpoints: vec![RPCEndpoint::testnet()],
        }
    }

    pub fn with_endpoint(mut self, endpoint: RPCEndpoint) -> Self {
        self.rpc_endpoints.push(endpoint);
        self
    }
}

#[derive(Debug)]
pub enum RetryResponse<R, E> {
    Ok(R),
    Retry(E),
    Critical(E),
}

impl<R, E> From<Result<R, E>> for RetryResponse<R, E> {
    fn from(value: Result<R, E>) -> Self {
        match value {
            Ok(value) => Self::Ok(value),
            Err(value) => Self::Retry(value),
        }
    }
}

/// Runs `task` until it succeeds, reports a critical error, or the policy runs out.
pub async fn retry<R, E, T, F>(policy: &RetryPolicy, mut task: F) -> Result<R, RetryError<E>>
where
    F: FnMut() -> T + Send,
    T: core::future::Future<Output = RetryResponse<R, E>> + Send,
    E: Send,
{
    let attempts = usize::from(policy.retries.max(1));
    let mut attempt = 0;
    loop {
        match task().await {
            RetryResponse::Ok(result) => return Ok(result),
            RetryResponse::Critical(error) => return Err(RetryError::Critical(error)),
            RetryResponse::Retry(error) => {
                if attempt + 1 >= attempts {
                    return Err(RetryError::RetriesExhausted(error));
                }
                tokio::time::sleep(policy.get_sleep_duration(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Walks the configured endpoints in order, applying each endpoint's retry policy.
pub async fn retry_endpoints<R, E, T, F>(
    network: &NetworkConfig,
    mut task: F,
) -> Result<R, RetryError<E>>
where
    F: FnMut(&RPCEndpoint) -> T + Send,
    T: core::future::Future<Output = RetryResponse<R, E>> + Send,
    E: Send,
{
    let mut last_error = RetryError::NoRpcEndpoints;
    for endpoint in &network.rpc_endpoints {
        match retry(&endpoint.retry_policy, || task(endpoint)).await {
            Ok(result) => return Ok(result),
            Err(RetryError::Critical(error)) => return Err(RetryError::Critical(error)),
            Err(exhausted) => last_error = exhausted,
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.get_sleep_duration(0), Duration::from_millis(10));
        assert_eq!(policy.get_sleep_duration(3), Duration::from_millis(80));

        let flat = policy.with_exponential_backoff(false, 2);
        assert_eq!(flat.get_sleep_duration(3), Duration::from_millis(10));

        // The multiplier saturates instead of overflowing.
        assert_eq!(
            policy.get_sleep_duration(200),
            Duration::from_millis(10) * u32::MAX
        );
    }

    #[test]
    fn verifier_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.challenge_message, "Identify myself");
        assert!(!config.require_ofac);
        assert!(config.check_key_liveness);
        assert_eq!(config.nonce_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_signature_age, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_clock_skew, Duration::from_secs(60));

        let partial: VerifierConfig = serde_json::from_str(r#"{"require_ofac": true}"#).unwrap();
        assert!(partial.require_ofac);
        assert_eq!(partial.challenge_message, "Identify myself");
    }

    #[test]
    fn well_known_endpoints_parse() {
        assert_eq!(NetworkConfig::mainnet().rpc_endpoints.len(), 1);
        assert_eq!(
            RPCEndpoint::mainnet().url.as_str(),
            "https://rpc.mainnet.near.org/"
        );
        assert_eq!(
            NetworkConfig::testnet().rpc_endpoints[0].url.as_str(),
            "https://rpc.testnet.near.org/"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<usize, RetryError<&str>> = retry(&RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => RetryResponse::Retry("busy"),
                    n => RetryResponse::Ok(n),
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_on_critical_and_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let critical: Result<(), _> = retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RetryResponse::Critical("rejected") }
        })
        .await;
        assert!(matches!(critical, Err(RetryError::Critical("rejected"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        calls.store(0, Ordering::SeqCst);
        let policy = RetryPolicy::default().with_retries(3);
        let exhausted: Result<(), _> = retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { RetryResponse::Retry("down") }
        })
        .await;
        assert!(matches!(exhausted, Err(RetryError::RetriesExhausted("down"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_are_tried_in_order() {
        let network = NetworkConfig {
            network_name: "test".to_string(),
            rpc_endpoints: vec![
                RPCEndpoint::new("http://first.invalid".parse().unwrap())
                    .with_retry_policy(RetryPolicy::default().with_retries(2)),
                RPCEndpoint::new("http://second.invalid".parse().unwrap()),
            ],
        };
        let hosts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let result: Result<&str, RetryError<&str>> = retry_endpoints(&network, |endpoint| {
            let host = endpoint.url.host_str().unwrap_or_default().to_string();
            hosts.lock().unwrap().push(host.clone());
            async move {
                if host == "second.invalid" {
                    RetryResponse::Ok("answered")
                } else {
                    RetryResponse::Retry("down")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "answered");
        assert_eq!(
            *hosts.lock().unwrap(),
            vec!["first.invalid", "first.invalid", "second.invalid"]
        );

        let empty = NetworkConfig {
            network_name: "empty".to_string(),
            rpc_endpoints: vec![],
        };
        let result: Result<(), RetryError<&str>> =
            retry_endpoints(&empty, |_| async { RetryResponse::Ok(()) }).await;
        assert!(matches!(result, Err(RetryError::NoRpcEndpoints)));
    }
}
