// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tokio::time::Instant;

use idstate_kernel::types::NodeHash;
use idstate_kernel::{MerkleNode, StateRoots};

use crate::did::Did;
use crate::network::RhsNode;

/// Nodes produced by one transition, waiting for delivery.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub identity: Did,
    pub state: NodeHash,
    pub roots: StateRoots,
    pub changed_nodes: Vec<MerkleNode>,
    pub attempts: u32,
    /// `None` means due now.
    pub next_retry_at: Option<Instant>,
    delivered: usize,
}

impl PublishJob {
    pub fn new(identity: Did, state: NodeHash, roots: StateRoots, changed_nodes: Vec<MerkleNode>) -> Self {
        Self {
            identity,
            state,
            roots,
            changed_nodes,
            attempts: 0,
            next_retry_at: None,
            delivered: 0,
        }
    }

    /// Wire records in delivery order. The state pointer is always last.
    pub fn records(&self) -> Vec<RhsNode> {
        let mut records: Vec<RhsNode> = self
            .changed_nodes
            .iter()
            .filter(|node| !node.is_empty())
            .map(RhsNode::from)
            .collect();
        records.push(RhsNode::state_pointer(self.state, &self.roots));
        records
    }

    /// Records already accepted by the service in earlier attempts.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub(crate) fn advance(&mut self, count: usize) {
        self.delivered += count;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_pointer_is_last() {
        let roots = StateRoots::new(NodeHash::from_u64(1), NodeHash::from_u64(2), NodeHash::from_u64(3));
        let leaf = MerkleNode::leaf(NodeHash::from_u64(9), NodeHash::from_u64(10));
        let job = PublishJob::new(
            "did:iden3:eth:main:job".parse().unwrap(),
            roots.commitment(),
            roots,
            vec![leaf, MerkleNode::empty()],
        );

        let records = job.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hash, leaf.hash);
        assert_eq!(records[1].hash, roots.commitment());
        assert_eq!(records[1].children, vec![roots.claims, roots.revocation, roots.roots]);
    }
}
