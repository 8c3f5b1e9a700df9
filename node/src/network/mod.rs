// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use idstate_kernel::types::NodeHash;
use idstate_kernel::{MerkleNode, StateRoots};

use crate::errors::PublishError;

pub use client::HttpRhsClient;

/// One record on the reverse hash service: a hash and the preimage parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhsNode {
    pub hash: NodeHash,
    pub children: Vec<NodeHash>,
}

impl RhsNode {
    /// Pointer from a state commitment to the three tree roots.
    pub fn state_pointer(commitment: NodeHash, roots: &StateRoots) -> Self {
        Self {
            hash: commitment,
            children: roots.wire_children().to_vec(),
        }
    }
}

impl From<&MerkleNode> for RhsNode {
    fn from(node: &MerkleNode) -> Self {
        Self {
            hash: node.hash,
            children: node.wire_children(),
        }
    }
}

/// Bulk, idempotent upsert of hash-keyed nodes.
#[async_trait]
pub trait RhsClient: Send + Sync {
    async fn save_nodes(&self, nodes: &[RhsNode]) -> Result<(), PublishError>;
}
