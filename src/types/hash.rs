// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical BLAKE3 node hashing.
//!
//! Every content address in the system is a [`NodeHash`]:
//! tree nodes, tree keys, claim slots digests and state commitments.
//!
//! # Hash Input Structure
//! ```text
//! leaf   = BLAKE3(0x01 || key || value)
//! middle = BLAKE3(0x02 || left || right)
//! empty  = 0x00 * 32
//! ```

use alloc::string::String;
use core::fmt;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{HASH_LEN, LEAF_TAG, MIDDLE_TAG};
use crate::error::{KernelError, KernelResult};

/// 32-byte content address. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeHash(pub [u8; HASH_LEN]);

impl NodeHash {
    /// Hash of the empty subtree.
    pub const ZERO: NodeHash = NodeHash([0u8; HASH_LEN]);

    /// Leaf marker appended to leaf children on the reverse hash wire format.
    pub const ONE: NodeHash = {
        let mut bytes = [0u8; HASH_LEN];
        bytes[0] = 1;
        NodeHash(bytes)
    };

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Little-endian integer in the low 8 bytes.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; HASH_LEN];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        NodeHash(bytes)
    }

    /// Inverse of [`NodeHash::from_u64`]; `None` if any high byte is set.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[8..].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        Some(u64::from_le_bytes(low))
    }

    /// Path bit for `level`: bit `level % 8` of byte `level / 8`, LSB first.
    pub fn bit(&self, level: usize) -> bool {
        (self.0[level / 8] >> (level % 8)) & 1 == 1
    }

    pub fn from_hex(s: &str) -> KernelResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| KernelError::InvalidEncoding)?;
        Ok(NodeHash(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; HASH_LEN]> for NodeHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        NodeHash(bytes)
    }
}

impl From<blake3::Hash> for NodeHash {
    fn from(hash: blake3::Hash) -> Self {
        NodeHash(*hash.as_bytes())
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self)
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct HexVisitor;

impl<'de> de::Visitor<'de> for HexVisitor {
    type Value = NodeHash;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32-byte hex string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeHash, E> {
        NodeHash::from_hex(v).map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(HexVisitor)
    }
}

/// Domain-separated BLAKE3 over a sequence of byte strings.
pub fn hash_tagged(domain: &[u8], parts: &[&[u8]]) -> NodeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn hash_leaf(key: &NodeHash, value: &NodeHash) -> NodeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(&key.0);
    hasher.update(&value.0);
    hasher.finalize().into()
}

pub fn hash_middle(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[MIDDLE_TAG]);
    hasher.update(&left.0);
    hasher.update(&right.0);
    hasher.finalize().into()
}
