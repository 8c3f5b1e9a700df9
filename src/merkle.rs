// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Content-addressed Merkle nodes.
//!
//! A node's key IS its hash, so nodes are immutable once written and shared
//! freely across revisions of the same tree.

use alloc::vec;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::types::hash::{hash_leaf, hash_middle, NodeHash};
use crate::types::NodeKind;

/// Key/value payload of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeafEntry {
    pub key: NodeHash,
    pub value: NodeHash,
}

impl LeafEntry {
    pub fn new(key: NodeHash, value: NodeHash) -> Self {
        Self { key, value }
    }

    pub fn hash(&self) -> NodeHash {
        hash_leaf(&self.key, &self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: NodeHash,
    pub kind: NodeKind,
    /// `[left, right]` for middle nodes, `[None, None]` otherwise.
    pub children: [Option<NodeHash>; 2],
    /// Set for leaves only.
    pub value: Option<LeafEntry>,
}

impl MerkleNode {
    pub fn empty() -> Self {
        Self {
            hash: NodeHash::ZERO,
            kind: NodeKind::Empty,
            children: [None, None],
            value: None,
        }
    }

    pub fn leaf(key: NodeHash, value: NodeHash) -> Self {
        let entry = LeafEntry::new(key, value);
        Self {
            hash: entry.hash(),
            kind: NodeKind::Leaf,
            children: [None, None],
            value: Some(entry),
        }
    }

    pub fn middle(left: NodeHash, right: NodeHash) -> Self {
        Self {
            hash: hash_middle(&left, &right),
            kind: NodeKind::Middle,
            children: [Some(left), Some(right)],
            value: None,
        }
    }

    /// Middle node with `node` on the side selected by `bit` and `sibling` on the other.
    pub fn joined(bit: bool, node: NodeHash, sibling: NodeHash) -> Self {
        if bit {
            Self::middle(sibling, node)
        } else {
            Self::middle(node, sibling)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == NodeKind::Empty
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Child on the `bit` side (`false` = left). Missing children are empty.
    pub fn child(&self, bit: bool) -> NodeHash {
        self.children[bit as usize].unwrap_or(NodeHash::ZERO)
    }

    /// Leaf entry, or `InvalidNode` if this is not a well-formed leaf.
    pub fn entry(&self) -> KernelResult<LeafEntry> {
        match (self.kind, self.value) {
            (NodeKind::Leaf, Some(entry)) => Ok(entry),
            _ => Err(KernelError::InvalidNode),
        }
    }

    /// Recompute the content address and compare.
    pub fn verify_hash(&self) -> KernelResult<()> {
        let expected = match self.kind {
            NodeKind::Empty => NodeHash::ZERO,
            NodeKind::Leaf => self.entry()?.hash(),
            NodeKind::Middle => match self.children {
                [Some(left), Some(right)] => hash_middle(&left, &right),
                _ => return Err(KernelError::InvalidNode),
            },
        };
        if expected == self.hash {
            Ok(())
        } else {
            Err(KernelError::InvalidNode)
        }
    }

    /// Children as published to the reverse hash service.
    ///
    /// Middle: `[left, right]`. Leaf: `[key, value, ONE]`. Empty: `[]`.
    pub fn wire_children(&self) -> Vec<NodeHash> {
        match (self.kind, self.value) {
            (NodeKind::Leaf, Some(entry)) => vec![entry.key, entry.value, NodeHash::ONE],
            (NodeKind::Middle, _) => vec![self.child(false), self.child(true)],
            _ => Vec::new(),
        }
    }
}
