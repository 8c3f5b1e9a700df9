// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Offline verification of issuer proofs.

use serde::{Deserialize, Serialize};

use crate::claim::ClaimEntry;
use crate::commitment::StateRoots;
use crate::error::{KernelError, KernelResult};
use crate::proof::MerkleProof;
use crate::types::key::{nonce_key, revision_key};
use crate::types::NodeHash;

/// Revocation status of one nonce, bound to an issuer state commitment.
///
/// A verifier holding only `state` can check this without contacting the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonRevocationProof {
    pub nonce: u64,
    pub issuer: StateRoots,
    pub state: NodeHash,
    pub proof: MerkleProof,
}

impl NonRevocationProof {
    /// Returns `Ok(true)` when the nonce is revoked, `Ok(false)` when it is not.
    pub fn verify(&self) -> KernelResult<bool> {
        if self.issuer.commitment() != self.state {
            return Err(KernelError::ProofVerificationFailed);
        }
        self.proof.verify(&self.issuer.revocation, &nonce_key(self.nonce))?;
        Ok(self.proof.existence)
    }

    /// Revocation time recorded in the leaf, if revoked.
    pub fn revoked_at(&self) -> Option<u64> {
        self.proof.value().and_then(|value| value.to_u64())
    }
}

/// Proof that a claim existed under a claims root archived in the roots tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalClaimProof {
    /// Roots-tree revision under which `archived_claims_root` was recorded.
    pub revision: u64,
    pub archived_claims_root: NodeHash,
    pub roots_root: NodeHash,
    pub root_proof: MerkleProof,
    pub claim_proof: MerkleProof,
}

impl HistoricalClaimProof {
    pub fn verify(&self, claim: &ClaimEntry) -> KernelResult<()> {
        self.root_proof.verify_inclusion(
            &self.roots_root,
            &revision_key(self.revision),
            &self.archived_claims_root,
        )?;
        verify_claim(&self.claim_proof, &self.archived_claims_root, claim)
    }
}

/// Check an inclusion proof for `claim` under `claims_root`.
pub fn verify_claim(proof: &MerkleProof, claims_root: &NodeHash, claim: &ClaimEntry) -> KernelResult<()> {
    proof.verify_inclusion(claims_root, &claim.tree_key(), &claim.value_hash())
}
