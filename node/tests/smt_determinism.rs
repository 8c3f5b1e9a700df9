use std::sync::Arc;

use idstate_kernel::types::key::nonce_key;
use idstate_kernel::types::{NodeHash, TreeKind};
use idstate_node::did::Did;
use idstate_node::revocation;
use idstate_node::smt::SparseMerkleTree;
use idstate_node::store::{MemoryNodeStore, NodeStore};

const KEYS: u64 = 40;

fn identity() -> Did {
    "did:iden3:eth:sepolia:determinism".parse().unwrap()
}

fn fresh_tree() -> SparseMerkleTree {
    SparseMerkleTree::at_root(Arc::new(MemoryNodeStore::new()), identity(), TreeKind::Revocation, NodeHash::ZERO, 64)
}

fn value(i: u64) -> NodeHash {
    NodeHash::from_u64(1_000 + i)
}

async fn build(order: impl IntoIterator<Item = u64>) -> SparseMerkleTree {
    let mut tree = fresh_tree();
    for i in order {
        tree.put(nonce_key(i), value(i)).await.unwrap();
    }
    tree.commit().await.unwrap();
    tree
}

#[tokio::test]
async fn test_root_independent_of_insertion_order() {
    let forward = build(0..KEYS).await.root();
    let reverse = build((0..KEYS).rev()).await.root();
    // 17 is coprime with 40, so this visits every key once.
    let scattered = build((0..KEYS).map(|i| (i * 17) % KEYS)).await.root();

    assert_eq!(forward, reverse);
    assert_eq!(forward, scattered);
    assert_ne!(forward, NodeHash::ZERO);
}

#[tokio::test]
async fn test_deletes_restore_canonical_shape() {
    let mut tree = build(0..KEYS).await;
    for i in (0..KEYS).filter(|i| i % 4 == 0) {
        tree.delete(&nonce_key(i)).await.unwrap();
    }
    tree.commit().await.unwrap();

    let direct = build((0..KEYS).filter(|i| i % 4 != 0)).await;
    assert_eq!(tree.root(), direct.root());

    for i in 0..KEYS {
        tree.delete(&nonce_key(i)).await.ok();
    }
    assert_eq!(tree.root(), NodeHash::ZERO);
}

#[tokio::test]
async fn test_every_proof_verifies() {
    let tree = build((0..KEYS).filter(|i| i % 3 != 0)).await;
    let root = tree.root();

    for i in 0..KEYS + 10 {
        let key = nonce_key(i);
        let proof = tree.proof(&key).await.unwrap();
        proof.verify(&root, &key).unwrap();
        if i < KEYS && i % 3 != 0 {
            assert!(proof.existence, "key {} should be present", i);
            proof.verify_inclusion(&root, &key, &value(i)).unwrap();
        } else {
            assert!(!proof.existence, "key {} should be absent", i);
        }
    }
}

#[tokio::test]
async fn test_reopened_tree_reads_committed_nodes() {
    let store = Arc::new(MemoryNodeStore::new());
    let mut tree = SparseMerkleTree::at_root(store.clone(), identity(), TreeKind::Claims, NodeHash::ZERO, 64);
    for i in 0..8 {
        tree.put(nonce_key(i), value(i)).await.unwrap();
    }
    let root = tree.commit().await.unwrap();
    assert_eq!(store.get_root(&identity(), TreeKind::Claims).await.unwrap(), root);

    let reopened = SparseMerkleTree::open(store.clone(), identity(), TreeKind::Claims, 64).await.unwrap();
    assert_eq!(reopened.root(), root);
    assert_eq!(reopened.get(&nonce_key(5)).await.unwrap(), Some(value(5)));
    assert_eq!(reopened.get(&nonce_key(9)).await.unwrap(), None);

    // Other trees of the same identity are untouched.
    assert_eq!(store.get_root(&identity(), TreeKind::Roots).await.unwrap(), NodeHash::ZERO);
}

#[tokio::test]
async fn test_revocation_invalidates_old_non_inclusion_proof() {
    let mut tree = build(0..5).await;
    let before = tree.root();
    let (revoked, stale) = revocation::status(&tree, 7).await.unwrap();
    assert!(!revoked);

    assert!(revocation::revoke(&mut tree, 7, 1_700_000_000).await.unwrap());
    tree.commit().await.unwrap();
    let after = tree.root();
    assert_ne!(before, after);

    assert!(stale.verify(&before, &nonce_key(7)).is_ok());
    assert!(stale.verify(&after, &nonce_key(7)).is_err());

    let (revoked, fresh) = revocation::status(&tree, 7).await.unwrap();
    assert!(revoked);
    assert_eq!(fresh.value(), Some(NodeHash::from_u64(1_700_000_000)));
}

#[tokio::test]
async fn test_revoking_twice_keeps_root() {
    let mut tree = build(0..5).await;
    assert!(revocation::revoke(&mut tree, 30, 10).await.unwrap());
    let once = tree.commit().await.unwrap();

    assert!(!revocation::revoke(&mut tree, 30, 99).await.unwrap());
    assert!(!tree.has_uncommitted());
    assert_eq!(tree.root(), once);
}
