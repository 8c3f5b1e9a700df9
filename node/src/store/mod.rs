// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Storage contracts for tree nodes and identity state records.
//!
//! Backends only persist; they never interpret tree structure or lifecycle
//! rules. Both contracts are object safe so the engine can hold `Arc<dyn _>`.

pub mod memory;

use async_trait::async_trait;

use idstate_kernel::types::{NodeHash, TreeKind};
use idstate_kernel::MerkleNode;

use crate::did::Did;
use crate::errors::StoreError;
use crate::state::{IdentityState, PublishStatus, StateStatus};

pub use memory::{MemoryNodeStore, MemoryStateStore};

/// Content-addressed node persistence scoped per `(identity, tree)`.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn get_node(&self, identity: &Did, tree: TreeKind, hash: &NodeHash) -> Result<Option<MerkleNode>, StoreError>;

    async fn put_nodes(&self, identity: &Did, tree: TreeKind, nodes: &[MerkleNode]) -> Result<(), StoreError>;

    /// `NodeHash::ZERO` when the tree has never been committed.
    async fn get_root(&self, identity: &Did, tree: TreeKind) -> Result<NodeHash, StoreError>;

    /// Atomic pointer swap. Called only after every node below `root` is written.
    async fn set_root(&self, identity: &Did, tree: TreeKind, root: NodeHash) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put_state(&self, state: IdentityState) -> Result<(), StoreError>;

    /// Returns the updated record, or `None` if no such state exists.
    async fn update_status(
        &self,
        identity: &Did,
        commitment: &NodeHash,
        status: StateStatus,
        reason: Option<String>,
    ) -> Result<Option<IdentityState>, StoreError>;

    async fn mark_publish(&self, identity: &Did, commitment: &NodeHash, publish: PublishStatus) -> Result<(), StoreError>;

    async fn latest(&self, identity: &Did) -> Result<Option<IdentityState>, StoreError>;

    async fn get(&self, identity: &Did, commitment: &NodeHash) -> Result<Option<IdentityState>, StoreError>;

    /// Every record for `identity`, oldest first.
    async fn history(&self, identity: &Did) -> Result<Vec<IdentityState>, StoreError>;

    /// Raise the nonce high-water mark. Lower values are ignored.
    async fn record_nonce(&self, identity: &Did, nonce: u64) -> Result<(), StoreError>;

    /// Largest nonce ever recorded for `identity`.
    async fn highest_nonce(&self, identity: &Did) -> Result<Option<u64>, StoreError>;
}
