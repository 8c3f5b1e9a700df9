// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::types::hash::{hash_leaf, hash_middle, NodeHash};
use crate::types::key::{nonce_key, revision_key};

#[test]
fn test_u64_embedding() {
    let h = NodeHash::from_u64(0xdead_beef);
    assert_eq!(h.to_u64(), Some(0xdead_beef));

    let mut wide = NodeHash::from_u64(1);
    wide.0[31] = 1;
    assert_eq!(wide.to_u64(), None, "high bytes set must not decode as u64");
}

#[test]
fn test_path_bits_lsb_first() {
    let mut h = NodeHash::ZERO;
    h.0[0] = 0b0000_0101;
    h.0[1] = 0b1000_0000;

    assert!(h.bit(0));
    assert!(!h.bit(1));
    assert!(h.bit(2));
    assert!(h.bit(15));
    assert!(!h.bit(8));
}

#[test]
fn test_leaf_and_middle_are_domain_separated() {
    let a = NodeHash::from_u64(1);
    let b = NodeHash::from_u64(2);
    assert_ne!(hash_leaf(&a, &b), hash_middle(&a, &b));
}

#[test]
fn test_key_domains_differ() {
    // Same logical integer in different trees must not collide.
    assert_ne!(nonce_key(7), revision_key(7));
    assert_eq!(nonce_key(7), nonce_key(7));
}

#[test]
fn test_hex_serialization() {
    let h = NodeHash::from_u64(42);
    let json = serde_json::to_string(&h).unwrap();
    assert_eq!(json, format!("\"{}\"", h.to_hex()));

    let decoded: NodeHash = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, h);

    assert!(serde_json::from_str::<NodeHash>("\"abcd\"").is_err());
}

#[test]
fn test_hex_accepts_prefix() {
    let h = NodeHash::from_u64(9);
    let prefixed = format!("0x{}", h.to_hex());
    assert_eq!(NodeHash::from_hex(&prefixed).unwrap(), h);
}
