//! Passport identity verification for NEAR accounts.
//!
//! A user proves possession of a passport with a [Self.xyz](https://self.xyz) zero-knowledge
//! proof and proves control of a NEAR account by signing a
//! [NEP-413](https://github.com/near/NEPs/blob/master/neps/nep-0413.md) challenge. The signature
//! travels inside the proof's user context data. This crate checks both halves, binds them
//! together, and records the result in an on-chain registry:
//! - [The verification flow](Verifier), with step-by-step [outcomes](VerificationOutcome)
//! - [Self.xyz proof verification](self_xyz::ProofVerifier)
//! - [The verification registry](VerificationContract) with an [in-memory implementation](InMemoryContract)
//!   and a [retrying decorator](RetryingContract)
//! - [Nonce replay protection](NonceStore)
//! - [Key liveness checks](AccessKeyChecker) over NEAR JSON-RPC with backup endpoints
//!
//! Pure building blocks (the NEP-413 codec, the user context data parser, proof types) live in
//! [`near_passport_types`], re-exported as [`types`].
//!
//! Logging goes through `tracing` under the `near_passport::*` targets. No subscriber is installed.

mod access_key;
mod config;
mod contract;
mod nonce;
mod verify;

pub use near_passport_types as types;
pub mod errors;
pub mod self_xyz;

pub use crate::{
    access_key::{AccessKeyChecker, RpcAccessKeyChecker, interpret_access_key_response},
    config::{
        DEFAULT_CHALLENGE_MESSAGE, NetworkConfig, RPCEndpoint, RetryPolicy, RetryResponse,
        VerifierConfig, retry, retry_endpoints,
    },
    contract::{
        InMemoryContract, MAX_PAGE_SIZE, RetryingContract, VerificationContract,
        VerificationRecord,
    },
    nonce::{InMemoryNonceStore, NonceStore},
    types::{
        AccountId, AttestationId, ED25519PublicKey, ErrorCode, NearSignatureBundle,
        ProofVerification, ZkProof,
    },
    verify::{
        Clock, ProofData, RegistrationRequest, SignatureAudit, StepKind, StepStatus,
        SystemClock, VerificationOutcome, VerificationStep, Verifier,
    },
};
