// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{KeyProvider, KeyType, Signature};
use crate::did::Did;
use crate::errors::KeyError;

/// In-process ed25519 vault. One key per identity.
#[derive(Default)]
pub struct LocalKeyProvider {
    keys: RwLock<HashMap<Did, SigningKey>>,
    suspended: RwLock<HashSet<Did>>,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key for `identity` (or return the existing public key).
    pub async fn create_key(&self, identity: &Did) -> Vec<u8> {
        let mut keys = self.keys.write().await;
        let key = keys
            .entry(identity.clone())
            .or_insert_with(|| SigningKey::generate(&mut OsRng));
        key.verifying_key().to_bytes().to_vec()
    }

    pub async fn public_key(&self, identity: &Did) -> Option<Vec<u8>> {
        let keys = self.keys.read().await;
        keys.get(identity).map(|k| k.verifying_key().to_bytes().to_vec())
    }

    /// Refuse signing for `identity` until resumed.
    pub async fn suspend(&self, identity: &Did) {
        self.suspended.write().await.insert(identity.clone());
    }

    pub async fn resume(&self, identity: &Did) {
        self.suspended.write().await.remove(identity);
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn sign(&self, identity: &Did, payload: &[u8]) -> Result<Signature, KeyError> {
        if self.suspended.read().await.contains(identity) {
            return Err(KeyError::SigningDenied(format!("key for {} is suspended", identity)));
        }
        let keys = self.keys.read().await;
        let key = keys
            .get(identity)
            .ok_or_else(|| KeyError::KeyUnavailable(format!("no ed25519 key for {}", identity)))?;
        let signature = key.sign(payload);
        Ok(Signature {
            key_type: KeyType::Ed25519,
            public_key: key.verifying_key().to_bytes().to_vec(),
            bytes: signature.to_bytes().to_vec(),
        })
    }
}

/// Check an ed25519 [`Signature`] over `payload`.
pub fn verify_ed25519(signature: &Signature, payload: &[u8]) -> bool {
    if signature.key_type != KeyType::Ed25519 {
        return false;
    }
    let Ok(public) = <[u8; 32]>::try_from(signature.public_key.as_slice()) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(signature.bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&public) else {
        return false;
    };
    key.verify(payload, &ed25519_dalek::Signature::from_bytes(&bytes)).is_ok()
}
