// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Key management: a registry of signing providers keyed by key type.
//!
//! The engine only ever calls [`KeyManager::sign`]; where keys live (software
//! vault, HSM, remote signer) is up to the registered provider.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::did::Did;
use crate::errors::KeyError;

pub use local::LocalKeyProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Credential and state-transition signing.
    Ed25519,
    /// On-chain facing operations.
    Secp256k1,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ed25519 => f.write_str("ed25519"),
            KeyType::Secp256k1 => f.write_str("secp256k1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub key_type: KeyType,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn sign(&self, identity: &Did, payload: &[u8]) -> Result<Signature, KeyError>;
}

/// Built once at startup, then shared read-only.
#[derive(Default, Clone)]
pub struct KeyManager {
    providers: HashMap<KeyType, Arc<dyn KeyProvider>>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, key_type: KeyType, provider: Arc<dyn KeyProvider>) -> Result<(), KeyError> {
        if self.providers.contains_key(&key_type) {
            return Err(KeyError::DuplicateKeyType(key_type));
        }
        info!(%key_type, "registered signing provider");
        self.providers.insert(key_type, provider);
        Ok(())
    }

    pub fn supports(&self, key_type: KeyType) -> bool {
        self.providers.contains_key(&key_type)
    }

    pub async fn sign(&self, key_type: KeyType, identity: &Did, payload: &[u8]) -> Result<Signature, KeyError> {
        let provider = self
            .providers
            .get(&key_type)
            .ok_or(KeyError::UnknownKeyType(key_type))?;
        provider.sign(identity, payload).await
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl KeyProvider for Fixed {
        async fn sign(&self, _identity: &Did, payload: &[u8]) -> Result<Signature, KeyError> {
            Ok(Signature {
                key_type: KeyType::Secp256k1,
                public_key: vec![1],
                bytes: payload.to_vec(),
            })
        }
    }

    fn did() -> Did {
        "did:iden3:eth:main:abc".parse().unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let mut keys = KeyManager::new();
        keys.register_provider(KeyType::Secp256k1, Arc::new(Fixed)).unwrap();
        assert_eq!(
            keys.register_provider(KeyType::Secp256k1, Arc::new(Fixed)),
            Err(KeyError::DuplicateKeyType(KeyType::Secp256k1))
        );
        assert!(keys.supports(KeyType::Secp256k1));
        assert!(!keys.supports(KeyType::Ed25519));
    }

    #[tokio::test]
    async fn test_unknown_key_type() {
        let keys = KeyManager::new();
        let err = keys.sign(KeyType::Ed25519, &did(), b"x").await.unwrap_err();
        assert_eq!(err, KeyError::UnknownKeyType(KeyType::Ed25519));
    }

    #[tokio::test]
    async fn test_dispatch_by_key_type() {
        let mut keys = KeyManager::new();
        keys.register_provider(KeyType::Secp256k1, Arc::new(Fixed)).unwrap();
        let sig = keys.sign(KeyType::Secp256k1, &did(), b"payload").await.unwrap();
        assert_eq!(sig.bytes, b"payload".to_vec());

        let json = serde_json::to_string(&sig).unwrap();
        assert!(json.contains(&hex::encode(b"payload")));
    }
}
