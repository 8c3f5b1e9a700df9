// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use idstate_kernel::types::{NodeHash, TreeKind};
use idstate_kernel::MerkleNode;

use super::{NodeStore, StateStore};
use crate::did::Did;
use crate::errors::StoreError;
use crate::state::{IdentityState, PublishStatus, StateStatus};

type Scope = (Did, TreeKind);

#[derive(Default)]
struct Tables {
    nodes: HashMap<Scope, HashMap<NodeHash, MerkleNode>>,
    roots: HashMap<Scope, NodeHash>,
}

/// In-process node store.
///
/// `set_available(false)` makes every call fail with `Unavailable`, which is
/// how outages are simulated.
#[derive(Default)]
pub struct MemoryNodeStore {
    tables: RwLock<Tables>,
    down: AtomicBool,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub async fn node_count(&self, identity: &Did, tree: TreeKind) -> usize {
        let tables = self.tables.read().await;
        tables
            .nodes
            .get(&(identity.clone(), tree))
            .map(|nodes| nodes.len())
            .unwrap_or(0)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get_node(&self, identity: &Did, tree: TreeKind, hash: &NodeHash) -> Result<Option<MerkleNode>, StoreError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .nodes
            .get(&(identity.clone(), tree))
            .and_then(|nodes| nodes.get(hash))
            .copied())
    }

    async fn put_nodes(&self, identity: &Did, tree: TreeKind, nodes: &[MerkleNode]) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let scope = tables.nodes.entry((identity.clone(), tree)).or_default();
        for node in nodes {
            scope.insert(node.hash, *node);
        }
        Ok(())
    }

    async fn get_root(&self, identity: &Did, tree: TreeKind) -> Result<NodeHash, StoreError> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .roots
            .get(&(identity.clone(), tree))
            .copied()
            .unwrap_or(NodeHash::ZERO))
    }

    async fn set_root(&self, identity: &Did, tree: TreeKind, root: NodeHash) -> Result<(), StoreError> {
        self.check()?;
        let mut tables = self.tables.write().await;
        tables.roots.insert((identity.clone(), tree), root);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<Did, Vec<IdentityState>>>,
    nonces: RwLock<HashMap<Did, u64>>,
    down: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory state store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put_state(&self, state: IdentityState) -> Result<(), StoreError> {
        self.check()?;
        let mut states = self.states.write().await;
        states.entry(state.identity.clone()).or_default().push(state);
        Ok(())
    }

    async fn update_status(
        &self,
        identity: &Did,
        commitment: &NodeHash,
        status: StateStatus,
        reason: Option<String>,
    ) -> Result<Option<IdentityState>, StoreError> {
        self.check()?;
        let mut states = self.states.write().await;
        let record = states
            .get_mut(identity)
            .and_then(|list| list.iter_mut().rev().find(|s| s.state_commitment == *commitment));
        Ok(record.map(|state| {
            state.status = status;
            if reason.is_some() {
                state.failure_reason = reason;
            }
            state.clone()
        }))
    }

    async fn mark_publish(&self, identity: &Did, commitment: &NodeHash, publish: PublishStatus) -> Result<(), StoreError> {
        self.check()?;
        let mut states = self.states.write().await;
        if let Some(state) = states
            .get_mut(identity)
            .and_then(|list| list.iter_mut().rev().find(|s| s.state_commitment == *commitment))
        {
            state.publish = publish;
        }
        Ok(())
    }

    async fn latest(&self, identity: &Did) -> Result<Option<IdentityState>, StoreError> {
        self.check()?;
        let states = self.states.read().await;
        Ok(states.get(identity).and_then(|list| list.last()).cloned())
    }

    async fn get(&self, identity: &Did, commitment: &NodeHash) -> Result<Option<IdentityState>, StoreError> {
        self.check()?;
        let states = self.states.read().await;
        Ok(states
            .get(identity)
            .and_then(|list| list.iter().rev().find(|s| s.state_commitment == *commitment))
            .cloned())
    }

    async fn history(&self, identity: &Did) -> Result<Vec<IdentityState>, StoreError> {
        self.check()?;
        let states = self.states.read().await;
        Ok(states.get(identity).cloned().unwrap_or_default())
    }

    async fn record_nonce(&self, identity: &Did, nonce: u64) -> Result<(), StoreError> {
        self.check()?;
        let mut nonces = self.nonces.write().await;
        let highest = nonces.entry(identity.clone()).or_insert(nonce);
        *highest = (*highest).max(nonce);
        Ok(())
    }

    async fn highest_nonce(&self, identity: &Did) -> Result<Option<u64>, StoreError> {
        self.check()?;
        Ok(self.nonces.read().await.get(identity).copied())
    }
}
