// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Tree key derivation.
//!
//! Logical keys (claim index, revocation nonce, roots revision) are hashed with a
//! per-tree domain tag so every tree uses fixed 256-bit keys.

use crate::config::{CLAIMS_KEY_DOMAIN, NONCE_KEY_DOMAIN, REVISION_KEY_DOMAIN};
use crate::types::hash::{hash_tagged, NodeHash};

/// Claims tree key for a claim index hash.
pub fn claim_key(index_hash: &NodeHash) -> NodeHash {
    hash_tagged(CLAIMS_KEY_DOMAIN, &[&index_hash.0])
}

/// Revocation tree key for a revocation nonce.
pub fn nonce_key(nonce: u64) -> NodeHash {
    hash_tagged(NONCE_KEY_DOMAIN, &[&nonce.to_le_bytes()])
}

/// Roots tree key for an archive revision.
pub fn revision_key(revision: u64) -> NodeHash {
    hash_tagged(REVISION_KEY_DOMAIN, &[&revision.to_le_bytes()])
}
