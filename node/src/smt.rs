// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sparse Merkle tree over a [`NodeStore`].
//!
//! # Shape
//! Compressed and canonical: a leaf sits at the shallowest depth where its key
//! prefix is unique, and no middle node has a leaf next to an empty sibling.
//! The root therefore depends only on the set of `(key, value)` pairs.
//!
//! # Sessions
//! Writes are staged in memory and advance the *working* root. `commit` writes
//! the staged nodes, then swaps the stored root pointer. Readers that hold the
//! committed root never observe a half-written tree.

use std::collections::HashMap;
use std::sync::Arc;

use idstate_kernel::config::MAX_KEY_BITS;
use idstate_kernel::types::{NodeHash, NodeKind, TreeKind};
use idstate_kernel::{LeafEntry, MerkleNode, MerkleProof};
use tracing::debug;

use crate::did::Did;
use crate::errors::EngineError;
use crate::store::NodeStore;

pub struct SparseMerkleTree {
    store: Arc<dyn NodeStore>,
    identity: Did,
    kind: TreeKind,
    max_levels: u16,
    root: NodeHash,
    committed: NodeHash,
    staged: HashMap<NodeHash, MerkleNode>,
    staged_order: Vec<NodeHash>,
    /// Nodes committed but not yet handed to the publisher.
    changes: Vec<MerkleNode>,
}

impl SparseMerkleTree {
    /// Open at the stored root.
    pub async fn open(
        store: Arc<dyn NodeStore>,
        identity: Did,
        kind: TreeKind,
        max_levels: u16,
    ) -> Result<Self, EngineError> {
        let root = store.get_root(&identity, kind).await?;
        Ok(Self::at_root(store, identity, kind, root, max_levels))
    }

    /// View at an arbitrary committed root. Used for consistent reads.
    pub fn at_root(
        store: Arc<dyn NodeStore>,
        identity: Did,
        kind: TreeKind,
        root: NodeHash,
        max_levels: u16,
    ) -> Self {
        Self {
            store,
            identity,
            kind,
            max_levels: max_levels.min(MAX_KEY_BITS),
            root,
            committed: root,
            staged: HashMap::new(),
            staged_order: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// Working root, including uncommitted writes.
    pub fn root(&self) -> NodeHash {
        self.root
    }

    pub fn committed_root(&self) -> NodeHash {
        self.committed
    }

    pub fn has_uncommitted(&self) -> bool {
        self.root != self.committed || !self.staged_order.is_empty()
    }

    pub async fn get(&self, key: &NodeHash) -> Result<Option<NodeHash>, EngineError> {
        let mut current = self.root;
        for depth in 0..=self.max_levels as usize {
            let node = self.load(&current).await?;
            match node.kind {
                NodeKind::Empty => return Ok(None),
                NodeKind::Leaf => {
                    let entry = node.entry()?;
                    return Ok((entry.key == *key).then_some(entry.value));
                }
                NodeKind::Middle => current = node.child(key.bit(depth)),
            }
        }
        Err(EngineError::ProofVerificationFailed)
    }

    pub async fn proof(&self, key: &NodeHash) -> Result<MerkleProof, EngineError> {
        let mut current = self.root;
        let mut siblings = Vec::new();
        for depth in 0..=self.max_levels as usize {
            let node = self.load(&current).await?;
            match node.kind {
                NodeKind::Empty => return Ok(MerkleProof::non_inclusion(siblings, None)),
                NodeKind::Leaf => {
                    let entry = node.entry()?;
                    return Ok(if entry.key == *key {
                        MerkleProof::inclusion(siblings, entry)
                    } else {
                        MerkleProof::non_inclusion(siblings, Some(entry))
                    });
                }
                NodeKind::Middle => {
                    let bit = key.bit(depth);
                    siblings.push(node.child(!bit));
                    current = node.child(bit);
                }
            }
        }
        Err(EngineError::ProofVerificationFailed)
    }

    /// Insert or overwrite `key`. Returns the new working root.
    pub async fn put(&mut self, key: NodeHash, value: NodeHash) -> Result<NodeHash, EngineError> {
        let (path, terminal) = self.descend(&key).await?;
        let depth = path.len();

        let subtree = match terminal.kind {
            NodeKind::Empty => self.stage(MerkleNode::leaf(key, value)),
            NodeKind::Leaf => {
                let existing = terminal.entry()?;
                if existing.key == key {
                    if existing.value == value {
                        return Ok(self.root);
                    }
                    self.stage(MerkleNode::leaf(key, value))
                } else {
                    self.push_down(depth, LeafEntry::new(key, value), existing)?
                }
            }
            NodeKind::Middle => return Err(EngineError::ProofVerificationFailed),
        };

        self.root = self.rebuild(&key, &path, subtree);
        debug!(tree = %self.kind, identity = %self.identity, root = %self.root, "tree put");
        Ok(self.root)
    }

    /// Remove `key`, collapsing lone leaves upward. Returns the new working root.
    pub async fn delete(&mut self, key: &NodeHash) -> Result<NodeHash, EngineError> {
        let (path, terminal) = self.descend(key).await?;
        match terminal.entry() {
            Ok(entry) if entry.key == *key => {}
            _ => return Err(EngineError::NotFound),
        }

        let mut current = NodeHash::ZERO;
        let mut collapsing = true;
        for (depth, sibling) in path.iter().enumerate().rev() {
            if collapsing {
                if current.is_zero() {
                    let sibling_node = self.load(sibling).await?;
                    if sibling_node.kind != NodeKind::Middle {
                        current = *sibling;
                        continue;
                    }
                } else if sibling.is_zero() {
                    continue;
                }
                collapsing = false;
            }
            current = self.stage(MerkleNode::joined(key.bit(depth), current, *sibling));
        }

        self.root = current;
        debug!(tree = %self.kind, identity = %self.identity, root = %self.root, "tree delete");
        Ok(self.root)
    }

    /// Persist staged nodes, then swap the stored root pointer.
    pub async fn commit(&mut self) -> Result<NodeHash, EngineError> {
        if !self.staged_order.is_empty() {
            let nodes: Vec<MerkleNode> = self
                .staged_order
                .iter()
                .filter_map(|hash| self.staged.get(hash).copied())
                .collect();
            self.store.put_nodes(&self.identity, self.kind, &nodes).await?;
            self.changes.extend(nodes);
        }
        if self.root != self.committed {
            self.store.set_root(&self.identity, self.kind, self.root).await?;
        }
        self.staged.clear();
        self.staged_order.clear();
        self.committed = self.root;
        Ok(self.root)
    }

    /// Drop uncommitted writes.
    pub fn rollback(&mut self) {
        self.root = self.committed;
        self.staged.clear();
        self.staged_order.clear();
    }

    /// Committed nodes not yet handed out, in write order.
    pub fn take_changes(&mut self) -> Vec<MerkleNode> {
        std::mem::take(&mut self.changes)
    }

    /// Put back nodes from an aborted hand-off ahead of newer changes.
    pub fn restore_changes(&mut self, mut nodes: Vec<MerkleNode>) {
        nodes.append(&mut self.changes);
        self.changes = nodes;
    }

    async fn load(&self, hash: &NodeHash) -> Result<MerkleNode, EngineError> {
        if hash.is_zero() {
            return Ok(MerkleNode::empty());
        }
        if let Some(node) = self.staged.get(hash) {
            return Ok(*node);
        }
        let node = self
            .store
            .get_node(&self.identity, self.kind, hash)
            .await?
            .ok_or(EngineError::MissingNode(*hash))?;
        if node.hash != *hash {
            return Err(EngineError::ProofVerificationFailed);
        }
        node.verify_hash()?;
        Ok(node)
    }

    /// Walk to the terminal (leaf or empty) for `key`, collecting siblings.
    async fn descend(&self, key: &NodeHash) -> Result<(Vec<NodeHash>, MerkleNode), EngineError> {
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            let node = self.load(&current).await?;
            if node.kind != NodeKind::Middle {
                return Ok((path, node));
            }
            let depth = path.len();
            if depth >= self.max_levels as usize {
                return Err(EngineError::ProofVerificationFailed);
            }
            let bit = key.bit(depth);
            path.push(node.child(!bit));
            current = node.child(bit);
        }
    }

    /// Split two leaves that collide at `depth` down to where their keys diverge.
    fn push_down(&mut self, depth: usize, new: LeafEntry, old: LeafEntry) -> Result<NodeHash, EngineError> {
        let max = self.max_levels as usize;
        let diverge = (depth..max)
            .find(|level| new.key.bit(*level) != old.key.bit(*level))
            .ok_or(EngineError::MaxLevelsReached)?;

        let new_leaf = self.stage(MerkleNode::leaf(new.key, new.value));
        let mut current = self.stage(MerkleNode::joined(new.key.bit(diverge), new_leaf, old.hash()));
        for level in (depth..diverge).rev() {
            current = self.stage(MerkleNode::joined(new.key.bit(level), current, NodeHash::ZERO));
        }
        Ok(current)
    }

    fn rebuild(&mut self, key: &NodeHash, path: &[NodeHash], subtree: NodeHash) -> NodeHash {
        let mut current = subtree;
        for (depth, sibling) in path.iter().enumerate().rev() {
            current = self.stage(MerkleNode::joined(key.bit(depth), current, *sibling));
        }
        current
    }

    fn stage(&mut self, node: MerkleNode) -> NodeHash {
        let hash = node.hash;
        if self.staged.insert(hash, node).is_none() {
            self.staged_order.push(hash);
        }
        hash
    }
}
