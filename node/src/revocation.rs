// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Revocation nonce allocation and the revocation tree.

use idstate_kernel::types::key::nonce_key;
use idstate_kernel::types::NodeHash;
use idstate_kernel::MerkleProof;
use tracing::{debug, error};

use crate::config::NoncePolicy;
use crate::errors::EngineError;
use crate::smt::SparseMerkleTree;

/// A reserved nonce. Must be passed back to [`NonceAllocator::commit`] once
/// the claim carrying it is in the claims tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct NonceReservation(u64);

impl NonceReservation {
    pub fn nonce(&self) -> u64 {
        self.0
    }
}

/// Per-identity monotonic nonce counter.
///
/// `floor` is one past the highest committed nonce; anything below it is
/// taken, so collisions are detected without remembering each nonce.
#[derive(Debug, Clone)]
pub struct NonceAllocator {
    policy: NoncePolicy,
    bits: u8,
    next: u128,
    floor: u128,
}

impl NonceAllocator {
    pub fn new(policy: NoncePolicy, bits: u8) -> Self {
        Self::resume(policy, bits, None)
    }

    /// Continue after `highest`, the largest nonce already handed out.
    pub fn resume(policy: NoncePolicy, bits: u8, highest: Option<u64>) -> Self {
        let floor = highest.map_or(0, |n| n as u128 + 1);
        Self {
            policy,
            bits: bits.clamp(1, 64),
            next: floor,
            floor,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Largest nonce representable in `bits`.
    pub fn max_nonce(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    pub fn in_range(&self, nonce: u64) -> bool {
        nonce <= self.max_nonce()
    }

    pub fn reserve(&mut self) -> Result<NonceReservation, EngineError> {
        if self.next > self.max_nonce() as u128 {
            return Err(EngineError::NonceSpaceExhausted(self.bits));
        }
        let nonce = self.next as u64;
        if self.policy == NoncePolicy::GapTolerant {
            self.next += 1;
        }
        Ok(NonceReservation(nonce))
    }

    /// Record the nonce as issued. Anything at or below the high-water mark
    /// is an invariant violation.
    pub fn commit(&mut self, reservation: NonceReservation) -> Result<u64, EngineError> {
        let nonce = reservation.0;
        if (nonce as u128) < self.floor {
            error!(nonce, "revocation nonce collision");
            return Err(EngineError::NonceCollision(nonce));
        }
        self.floor = nonce as u128 + 1;
        self.next = self.next.max(self.floor);
        Ok(nonce)
    }

    /// Hand back a committed nonce whose claim was removed again.
    ///
    /// Only the most recent nonce can be released; in gap-tolerant mode it
    /// stays burned.
    pub fn release(&mut self, nonce: u64) {
        if self.floor != nonce as u128 + 1 {
            return;
        }
        self.floor = nonce as u128;
        if self.policy == NoncePolicy::Gapless {
            self.next = self.floor;
        }
    }

    /// Largest committed nonce, if any.
    pub fn highest(&self) -> Option<u64> {
        self.floor.checked_sub(1).map(|n| n as u64)
    }
}

/// Write `{nonce_key(nonce): revoked_at}` unless already present.
///
/// Returns `false` when the nonce was already revoked (nothing written).
pub async fn revoke(tree: &mut SparseMerkleTree, nonce: u64, revoked_at: u64) -> Result<bool, EngineError> {
    let key = nonce_key(nonce);
    if tree.get(&key).await?.is_some() {
        debug!(nonce, "nonce already revoked");
        return Ok(false);
    }
    tree.put(key, NodeHash::from_u64(revoked_at)).await?;
    Ok(true)
}

/// Revocation status at the tree's working root, with a checked proof.
pub async fn status(tree: &SparseMerkleTree, nonce: u64) -> Result<(bool, MerkleProof), EngineError> {
    let key = nonce_key(nonce);
    let proof = tree.proof(&key).await?;
    proof.verify(&tree.root(), &key)?;
    Ok((proof.existence, proof))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gapless_does_not_burn_failed_reservations() {
        let mut alloc = NonceAllocator::new(NoncePolicy::Gapless, 32);
        let first = alloc.reserve().unwrap();
        // Dropped without commit: insert failed.
        let retry = alloc.reserve().unwrap();
        assert_eq!(first.nonce(), retry.nonce());
        assert_eq!(alloc.commit(retry).unwrap(), 0);
        assert_eq!(alloc.reserve().unwrap().nonce(), 1);
    }

    #[test]
    fn test_gap_tolerant_burns_every_reservation() {
        let mut alloc = NonceAllocator::new(NoncePolicy::GapTolerant, 32);
        let _lost = alloc.reserve().unwrap();
        let second = alloc.reserve().unwrap();
        assert_eq!(second.nonce(), 1);
        assert_eq!(alloc.commit(second).unwrap(), 1);
        assert_eq!(alloc.reserve().unwrap().nonce(), 2);
    }

    #[test]
    fn test_collision_is_fatal() {
        let mut alloc = NonceAllocator::new(NoncePolicy::Gapless, 32);
        let r = alloc.reserve().unwrap();
        alloc.commit(r).unwrap();
        assert!(matches!(alloc.commit(r), Err(EngineError::NonceCollision(0))));
    }

    #[test]
    fn test_lower_nonce_after_higher_collides() {
        let mut alloc = NonceAllocator::new(NoncePolicy::GapTolerant, 32);
        let low = alloc.reserve().unwrap();
        let high = alloc.reserve().unwrap();
        assert_eq!(alloc.commit(high).unwrap(), 1);
        assert!(matches!(alloc.commit(low), Err(EngineError::NonceCollision(0))));
        assert_eq!(alloc.highest(), Some(1));
    }

    #[test]
    fn test_resume_continues_after_highest() {
        let mut alloc = NonceAllocator::resume(NoncePolicy::Gapless, 32, Some(6));
        assert_eq!(alloc.reserve().unwrap().nonce(), 7);
        assert!(matches!(
            alloc.commit(NonceReservation(6)),
            Err(EngineError::NonceCollision(6))
        ));
        assert_eq!(NonceAllocator::resume(NoncePolicy::Gapless, 32, None).highest(), None);
    }

    #[test]
    fn test_release_reuses_nonce_only_when_gapless() {
        let mut gapless = NonceAllocator::new(NoncePolicy::Gapless, 32);
        let r = gapless.reserve().unwrap();
        gapless.commit(r).unwrap();
        gapless.release(0);
        assert_eq!(gapless.highest(), None);
        assert_eq!(gapless.reserve().unwrap().nonce(), 0);

        let mut tolerant = NonceAllocator::new(NoncePolicy::GapTolerant, 32);
        let r = tolerant.reserve().unwrap();
        tolerant.commit(r).unwrap();
        tolerant.release(0);
        assert_eq!(tolerant.reserve().unwrap().nonce(), 1);
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = NonceAllocator::new(NoncePolicy::Gapless, 2);
        for expected in 0..4 {
            let r = alloc.reserve().unwrap();
            assert_eq!(alloc.commit(r).unwrap(), expected);
        }
        assert!(matches!(alloc.reserve(), Err(EngineError::NonceSpaceExhausted(2))));
        assert!(!alloc.in_range(4));
    }

    #[test]
    fn test_full_width() {
        let alloc = NonceAllocator::new(NoncePolicy::Gapless, 64);
        assert_eq!(alloc.max_nonce(), u64::MAX);
    }
}
