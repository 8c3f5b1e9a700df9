// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Protocol constants.

/// Width of every node hash and tree key, in bytes.
pub const HASH_LEN: usize = 32;

/// One tree level per key bit.
pub const MAX_KEY_BITS: u16 = (HASH_LEN * 8) as u16;

/// Default depth bound for claims, revocation and roots trees.
pub const DEFAULT_MAX_LEVELS: u16 = 64;

/// Number of 32-byte slots in each half (index / value) of a claim.
pub const CLAIM_SLOTS: usize = 4;

/// Prefix byte for leaf node hashing.
pub const LEAF_TAG: u8 = 0x01;

/// Prefix byte for middle node hashing.
pub const MIDDLE_TAG: u8 = 0x02;

pub const STATE_DOMAIN: &[u8] = b"idstate/state/v1";
pub const TRANSITION_DOMAIN: &[u8] = b"idstate/transition/v1";

pub const CLAIM_INDEX_DOMAIN: &[u8] = b"idstate/claim/index";
pub const CLAIM_VALUE_DOMAIN: &[u8] = b"idstate/claim/value";

pub const CLAIMS_KEY_DOMAIN: &[u8] = b"idstate/key/claims";
pub const NONCE_KEY_DOMAIN: &[u8] = b"idstate/key/revocation";
pub const REVISION_KEY_DOMAIN: &[u8] = b"idstate/key/roots";
