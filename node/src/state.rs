// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use std::fmt;

use idstate_kernel::types::NodeHash;
use idstate_kernel::StateRoots;

use crate::did::Did;
use crate::keys::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    Pending,
    Confirmed,
    Failed,
}

impl StateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStatus::Pending => "pending",
            StateStatus::Confirmed => "confirmed",
            StateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery outcome of a state's nodes to the reverse hash service.
///
/// Independent of [`StateStatus`]: a degraded publish never rolls back a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Queued,
    Published,
    Degraded,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityState {
    pub identity: Did,
    /// Roots-tree revision consumed by this transition.
    pub revision: u64,
    pub roots: StateRoots,
    pub state_commitment: NodeHash,
    pub previous_state_commitment: Option<NodeHash>,
    pub status: StateStatus,
    pub publish: PublishStatus,
    /// Unix seconds.
    pub created_at: u64,
    pub transition_proof: Signature,
    pub failure_reason: Option<String>,
}

impl IdentityState {
    pub fn claims_tree_root(&self) -> NodeHash {
        self.roots.claims
    }

    pub fn revocation_tree_root(&self) -> NodeHash {
        self.roots.revocation
    }

    pub fn roots_tree_root(&self) -> NodeHash {
        self.roots.roots
    }

    pub fn is_pending(&self) -> bool {
        self.status == StateStatus::Pending
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
