// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fixed-width claim encoding.
//!
//! A claim is 4 index slots + 4 value slots of 32 bytes each. The index half
//! determines the claims-tree key, the value half the leaf value.
//!
//! # Slot Layout
//! ```text
//! index[0]  schema hash (16) | reserved (16)
//! index[1]  subject
//! index[2]  index data A
//! index[3]  index data B
//! value[0]  revocation nonce (u64 LE) | version (u32 LE) | expiration (u64 LE) | reserved
//! value[1]  reserved
//! value[2]  value data A
//! value[3]  value data B
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{CLAIM_INDEX_DOMAIN, CLAIM_SLOTS, CLAIM_VALUE_DOMAIN};
use crate::types::hash::{hash_tagged, NodeHash};
use crate::types::key::claim_key;

pub type Slot = [u8; 32];

pub type SchemaHash = [u8; 16];

const NONCE_RANGE: core::ops::Range<usize> = 0..8;
const VERSION_RANGE: core::ops::Range<usize> = 8..12;
const EXPIRATION_RANGE: core::ops::Range<usize> = 12..20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEntry {
    index: [Slot; CLAIM_SLOTS],
    value: [Slot; CLAIM_SLOTS],
}

impl ClaimEntry {
    pub fn new(schema: SchemaHash) -> Self {
        let mut index = [[0u8; 32]; CLAIM_SLOTS];
        index[0][..16].copy_from_slice(&schema);
        Self { index, value: [[0u8; 32]; CLAIM_SLOTS] }
    }

    pub fn with_subject(mut self, subject: Slot) -> Self {
        self.index[1] = subject;
        self
    }

    pub fn with_index_data(mut self, a: Slot, b: Slot) -> Self {
        self.index[2] = a;
        self.index[3] = b;
        self
    }

    pub fn with_value_data(mut self, a: Slot, b: Slot) -> Self {
        self.value[2] = a;
        self.value[3] = b;
        self
    }

    pub fn schema(&self) -> SchemaHash {
        let mut schema = [0u8; 16];
        schema.copy_from_slice(&self.index[0][..16]);
        schema
    }

    pub fn subject(&self) -> &Slot {
        &self.index[1]
    }

    pub fn index_slots(&self) -> &[Slot; CLAIM_SLOTS] {
        &self.index
    }

    pub fn value_slots(&self) -> &[Slot; CLAIM_SLOTS] {
        &self.value
    }

    pub fn revocation_nonce(&self) -> u64 {
        read_u64(&self.value[0], NONCE_RANGE)
    }

    pub fn set_revocation_nonce(&mut self, nonce: u64) {
        self.value[0][NONCE_RANGE].copy_from_slice(&nonce.to_le_bytes());
    }

    pub fn version(&self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.value[0][VERSION_RANGE]);
        u32::from_le_bytes(bytes)
    }

    pub fn set_version(&mut self, version: u32) {
        self.value[0][VERSION_RANGE].copy_from_slice(&version.to_le_bytes());
    }

    /// Expiration as unix seconds; zero means the claim does not expire.
    pub fn expiration(&self) -> Option<u64> {
        match read_u64(&self.value[0], EXPIRATION_RANGE) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn set_expiration(&mut self, at: Option<u64>) {
        let raw = at.unwrap_or(0);
        self.value[0][EXPIRATION_RANGE].copy_from_slice(&raw.to_le_bytes());
    }

    /// `hi`: digest of the index half.
    pub fn index_hash(&self) -> NodeHash {
        hash_tagged(
            CLAIM_INDEX_DOMAIN,
            &[&self.index[0], &self.index[1], &self.index[2], &self.index[3]],
        )
    }

    /// `hv`: digest of the value half. Stored as the claims-tree leaf value.
    pub fn value_hash(&self) -> NodeHash {
        hash_tagged(
            CLAIM_VALUE_DOMAIN,
            &[&self.value[0], &self.value[1], &self.value[2], &self.value[3]],
        )
    }

    pub fn tree_key(&self) -> NodeHash {
        claim_key(&self.index_hash())
    }
}

fn read_u64(slot: &Slot, range: core::ops::Range<usize>) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&slot[range]);
    u64::from_le_bytes(bytes)
}
