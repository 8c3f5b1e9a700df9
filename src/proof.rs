// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sparse Merkle proofs.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::config::MAX_KEY_BITS;
use crate::error::{KernelError, KernelResult};
use crate::merkle::{LeafEntry, MerkleNode};
use crate::types::NodeHash;

/// Inclusion or non-inclusion proof for one key.
///
/// `siblings[d]` is the sibling hash at depth `d` (root children are depth 0).
/// The walk terminates either at a leaf (`leaf` is set) or at an empty node.
///
/// - inclusion: `existence == true`, `leaf` holds the queried key and its value
/// - non-inclusion: `existence == false`, `leaf` is `None` (empty terminal) or a
///   different key sharing the queried path prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub existence: bool,
    pub siblings: Vec<NodeHash>,
    pub leaf: Option<LeafEntry>,
}

impl MerkleProof {
    pub fn inclusion(siblings: Vec<NodeHash>, entry: LeafEntry) -> Self {
        Self { existence: true, siblings, leaf: Some(entry) }
    }

    pub fn non_inclusion(siblings: Vec<NodeHash>, aux: Option<LeafEntry>) -> Self {
        Self { existence: false, siblings, leaf: aux }
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Value proven for the queried key, if this is an inclusion proof.
    pub fn value(&self) -> Option<NodeHash> {
        if self.existence {
            self.leaf.map(|entry| entry.value)
        } else {
            None
        }
    }

    /// Rebuild the root this proof commits to for `key`.
    pub fn compute_root(&self, key: &NodeHash) -> KernelResult<NodeHash> {
        if self.siblings.len() > MAX_KEY_BITS as usize {
            return Err(KernelError::InvalidEncoding);
        }

        let terminal = match (self.existence, self.leaf) {
            (true, Some(entry)) if entry.key == *key => entry.hash(),
            (true, _) => return Err(KernelError::ProofVerificationFailed),
            (false, Some(aux)) => {
                if aux.key == *key {
                    return Err(KernelError::ProofVerificationFailed);
                }
                // The auxiliary leaf must sit on the queried path.
                for level in 0..self.siblings.len() {
                    if aux.key.bit(level) != key.bit(level) {
                        return Err(KernelError::ProofVerificationFailed);
                    }
                }
                aux.hash()
            }
            (false, None) => NodeHash::ZERO,
        };

        let mut current = terminal;
        for (depth, sibling) in self.siblings.iter().enumerate().rev() {
            current = MerkleNode::joined(key.bit(depth), current, *sibling).hash;
        }
        Ok(current)
    }

    /// Check the proof for `key` against `root`.
    pub fn verify(&self, root: &NodeHash, key: &NodeHash) -> KernelResult<()> {
        if self.compute_root(key)? == *root {
            Ok(())
        } else {
            Err(KernelError::ProofVerificationFailed)
        }
    }

    /// Check an inclusion proof for exactly `(key, value)`.
    pub fn verify_inclusion(&self, root: &NodeHash, key: &NodeHash, value: &NodeHash) -> KernelResult<()> {
        if self.value() != Some(*value) {
            return Err(KernelError::ProofVerificationFailed);
        }
        self.verify(root, key)
    }
}
