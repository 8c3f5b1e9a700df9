// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::claim::ClaimEntry;

const SCHEMA: [u8; 16] = [7u8; 16];

fn sample() -> ClaimEntry {
    ClaimEntry::new(SCHEMA)
        .with_subject([1u8; 32])
        .with_index_data([2u8; 32], [3u8; 32])
        .with_value_data([4u8; 32], [5u8; 32])
}

#[test]
fn test_nonce_lives_in_value_half() {
    let mut claim = sample();
    let hi = claim.index_hash();
    let hv = claim.value_hash();

    claim.set_revocation_nonce(42);
    assert_eq!(claim.revocation_nonce(), 42);
    assert_eq!(claim.index_hash(), hi, "nonce must not move the claim in the tree");
    assert_ne!(claim.value_hash(), hv);
}

#[test]
fn test_metadata_fields_do_not_overlap() {
    let mut claim = sample();
    claim.set_revocation_nonce(u64::MAX);
    claim.set_version(3);
    claim.set_expiration(Some(1_700_000_000));

    assert_eq!(claim.revocation_nonce(), u64::MAX);
    assert_eq!(claim.version(), 3);
    assert_eq!(claim.expiration(), Some(1_700_000_000));

    claim.set_expiration(None);
    assert_eq!(claim.expiration(), None);
    assert_eq!(claim.version(), 3);
}

#[test]
fn test_index_fields_drive_tree_key() {
    let claim = sample();
    assert_eq!(claim.schema(), SCHEMA);
    assert_eq!(claim.subject(), &[1u8; 32]);

    let other = sample().with_subject([9u8; 32]);
    assert_ne!(claim.tree_key(), other.tree_key());
    assert_eq!(claim.tree_key(), sample().tree_key());
}
