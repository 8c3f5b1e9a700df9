// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity state commitment.
//!
//! # Guarantee
//! Same three roots → same commitment (no timestamps, no randomness).

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::config::{STATE_DOMAIN, TRANSITION_DOMAIN};
use crate::types::hash::{hash_tagged, NodeHash};
use crate::types::TreeKind;

/// Roots of the claims, revocation and roots trees at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRoots {
    pub claims: NodeHash,
    pub revocation: NodeHash,
    pub roots: NodeHash,
}

impl StateRoots {
    pub fn new(claims: NodeHash, revocation: NodeHash, roots: NodeHash) -> Self {
        Self { claims, revocation, roots }
    }

    pub fn get(&self, tree: TreeKind) -> NodeHash {
        match tree {
            TreeKind::Claims => self.claims,
            TreeKind::Revocation => self.revocation,
            TreeKind::Roots => self.roots,
        }
    }

    /// BLAKE3(STATE_DOMAIN || claims || revocation || roots)
    pub fn commitment(&self) -> NodeHash {
        hash_tagged(STATE_DOMAIN, &[&self.claims.0, &self.revocation.0, &self.roots.0])
    }

    /// Children of the state pointer node published to the reverse hash service.
    pub fn wire_children(&self) -> [NodeHash; 3] {
        [self.claims, self.revocation, self.roots]
    }
}

/// Bytes a signer authorizes for a transition `previous -> next`.
///
/// A first transition has no predecessor and signs over `ZERO`.
pub fn transition_message(previous: Option<&NodeHash>, next: &NodeHash) -> Vec<u8> {
    let previous = previous.copied().unwrap_or(NodeHash::ZERO);
    let mut message = Vec::with_capacity(TRANSITION_DOMAIN.len() + 64);
    message.extend_from_slice(TRANSITION_DOMAIN);
    message.extend_from_slice(&previous.0);
    message.extend_from_slice(&next.0);
    message
}
