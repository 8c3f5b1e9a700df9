// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use idstate_kernel::error::KernelError;
use idstate_kernel::types::NodeHash;
use thiserror::Error;

use crate::keys::KeyType;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Proof verification failed")]
    ProofVerificationFailed,
    #[error("Maximum tree depth reached")]
    MaxLevelsReached,
    #[error("Tree node {0} missing from store")]
    MissingNode(NodeHash),
    #[error("Kernel error: {0}")]
    Kernel(KernelError),
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("Identity already provisioned: {0}")]
    IdentityExists(String),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Did(#[from] DidError),
    #[error("Revocation nonce {0} was already issued")]
    NonceCollision(u64),
    #[error("Revocation nonce space exhausted ({0} bits)")]
    NonceSpaceExhausted(u8),
    #[error("Claim already present in claims tree")]
    ClaimExists,
    #[error("Unknown state {commitment} for identity {identity}")]
    UnknownState { identity: String, commitment: NodeHash },
    #[error("State {0} is no longer pending")]
    StateNotPending(NodeHash),
    #[error("Not found")]
    NotFound,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<KernelError> for EngineError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::ProofVerificationFailed | KernelError::InvalidNode => EngineError::ProofVerificationFailed,
            KernelError::MaxLevelsReached => EngineError::MaxLevelsReached,
            other => EngineError::Kernel(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

/// Failure of a node or state store backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("No signing provider registered for key type {0}")]
    UnknownKeyType(KeyType),
    #[error("A signing provider is already registered for key type {0}")]
    DuplicateKeyType(KeyType),
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("Signing denied: {0}")]
    SigningDenied(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DidError {
    #[error("Malformed DID: {0}")]
    Malformed(String),
    #[error("Unsupported DID method: {0}")]
    UnknownMethod(String),
    #[error("Unsupported network {blockchain}:{network} for method {method}")]
    UnknownNetwork { method: String, blockchain: String, network: String },
    #[error("DID method {0} registered twice")]
    DuplicateMethod(String),
    #[error("Network {0} registered twice")]
    DuplicateNetwork(String),
}

/// Outcome of one delivery attempt to the reverse hash service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Network failure or 5xx. Retried with backoff.
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// Rejected payload (4xx). Never retried.
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
