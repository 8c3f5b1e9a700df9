use std::sync::Arc;
use std::time::Duration;

use idstate_kernel::claim::ClaimEntry;
use idstate_kernel::types::NodeHash;
use idstate_node::config::NodeConfig;
use idstate_node::did::{Did, DidMethodTable};
use idstate_node::engine::{spawn_deadline_watcher, EngineSettings, StateEngine};
use idstate_node::errors::{DidError, EngineError, KeyError};
use idstate_node::keys::{local::verify_ed25519, KeyManager, KeyType, LocalKeyProvider};
use idstate_node::publisher::Publisher;
use idstate_node::state::{IdentityState, PublishStatus, StateStatus};
use idstate_node::store::{MemoryNodeStore, MemoryStateStore};

const ISSUER: &str = "did:polygonid:polygon:amoy:2qH7XAwYQzCp9VfhpNgeLtK2iCehDDrfMWUCEg5ig5";

struct Harness {
    engine: Arc<StateEngine>,
    vault: Arc<LocalKeyProvider>,
    nodes: Arc<MemoryNodeStore>,
    states: Arc<MemoryStateStore>,
}

fn harness(cfg: NodeConfig) -> Harness {
    harness_over(
        cfg,
        Arc::new(LocalKeyProvider::new()),
        Arc::new(MemoryNodeStore::new()),
        Arc::new(MemoryStateStore::new()),
    )
}

fn harness_over(
    cfg: NodeConfig,
    vault: Arc<LocalKeyProvider>,
    nodes: Arc<MemoryNodeStore>,
    states: Arc<MemoryStateStore>,
) -> Harness {
    let mut keys = KeyManager::new();
    keys.register_provider(KeyType::Ed25519, vault.clone()).unwrap();
    let dids = Arc::new(DidMethodTable::with_defaults(&cfg.did_networks).unwrap());

    let engine = StateEngine::new(
        EngineSettings::from(&cfg),
        nodes.clone(),
        states.clone(),
        Arc::new(keys),
        dids,
        Publisher::disabled(states.clone()),
    );
    Harness { engine: Arc::new(engine), vault, nodes, states }
}

/// A fresh engine over the same stores and key vault, as after a process restart.
fn restarted(h: &Harness, cfg: NodeConfig) -> Harness {
    harness_over(cfg, h.vault.clone(), h.nodes.clone(), h.states.clone())
}

async fn issuer(h: &Harness) -> Did {
    let did = h.engine.create_identity(ISSUER, KeyType::Ed25519).await.unwrap();
    h.vault.create_key(&did).await;
    did
}

fn claim(subject: u8) -> ClaimEntry {
    ClaimEntry::new([3u8; 16])
        .with_subject([subject; 32])
        .with_value_data([subject; 32], [0u8; 32])
}

async fn pending_count(h: &Harness, did: &Did) -> usize {
    h.engine
        .state_history(did)
        .await
        .unwrap()
        .iter()
        .filter(|s| s.status == StateStatus::Pending)
        .count()
}

async fn confirm_latest(h: &Harness, did: &Did) -> IdentityState {
    let current = h.engine.get_current_state(did).await.unwrap();
    assert_eq!(current.status, StateStatus::Pending);
    h.engine.confirm(did, &current.state_commitment).await.unwrap()
}

#[tokio::test]
async fn test_issue_confirm_revoke_scenario() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    // NoState until the first mutation.
    assert!(matches!(h.engine.get_current_state(&did).await, Err(EngineError::NotFound)));

    // Nonces 0..=6; the first opens a transition, the rest are batched.
    for subject in 0..7u8 {
        h.engine.issue_claim(&did, claim(subject)).await.unwrap();
    }
    confirm_latest(&h, &did).await;
    let before = confirm_latest(&h, &did).await;
    assert_eq!(before.status, StateStatus::Confirmed);

    let issued = h.engine.issue_claim(&did, claim(7)).await.unwrap();
    assert_eq!(issued.revocation_nonce, 7);
    assert_eq!(issued.claim.revocation_nonce(), 7);

    let pending = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(pending.status, StateStatus::Pending);
    assert_eq!(pending.previous_state_commitment, Some(before.state_commitment));
    assert_eq!(pending.publish, PublishStatus::Disabled);

    let confirmed = confirm_latest(&h, &did).await;
    assert_eq!(confirmed.status, StateStatus::Confirmed);
    assert_ne!(confirmed.claims_tree_root(), before.claims_tree_root());

    assert!(!h.engine.is_revoked(&did, 7).await.unwrap());
    h.engine.revoke_nonce(&did, 7).await.unwrap();
    assert_eq!(h.engine.get_current_state(&did).await.unwrap().status, StateStatus::Pending);
    confirm_latest(&h, &did).await;

    assert!(h.engine.is_revoked(&did, 7).await.unwrap());
    let proof = h.engine.get_non_revocation_proof(&did, 7).await.unwrap();
    assert_eq!(proof.verify(), Ok(true));
    assert!(proof.revoked_at().is_some());

    let clean = h.engine.get_non_revocation_proof(&did, 3).await.unwrap();
    assert_eq!(clean.verify(), Ok(false));
}

#[tokio::test]
async fn test_transition_is_signed_over_previous_and_next() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let first = confirm_latest(&h, &did).await;
    h.engine.issue_claim(&did, claim(2)).await.unwrap();
    let second = h.engine.get_current_state(&did).await.unwrap();

    let message = idstate_kernel::commitment::transition_message(
        second.previous_state_commitment.as_ref(),
        &second.state_commitment,
    );
    assert_eq!(second.previous_state_commitment, Some(first.state_commitment));
    assert!(verify_ed25519(&second.transition_proof, &message));
    assert_eq!(second.roots.commitment(), second.state_commitment);
}

#[tokio::test]
async fn test_mutations_while_pending_are_batched() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    let first = h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();

    let second = h.engine.issue_claim(&did, claim(2)).await.unwrap();
    h.engine.revoke_nonce(&did, first.revocation_nonce).await.unwrap();

    // Still the same single pending state.
    let history = h.engine.state_history(&did).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(pending_count(&h, &did).await, 1);
    assert!(h.engine.get_claim_proof(&did, &second.claim).await.is_ok());

    h.engine.confirm(&did, &s1.state_commitment).await.unwrap();
    let s2 = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(s2.status, StateStatus::Pending);
    assert_ne!(s2.claims_tree_root(), s1.claims_tree_root());
    assert_ne!(s2.revocation_tree_root(), s1.revocation_tree_root());
    assert_eq!(pending_count(&h, &did).await, 1);
}

#[tokio::test]
async fn test_concurrent_writers_keep_single_pending() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    let mut tasks = Vec::new();
    for subject in 0..24u8 {
        let engine = h.engine.clone();
        let did = did.clone();
        tasks.push(tokio::spawn(async move { engine.issue_claim(&did, claim(subject)).await }));
    }
    let mut issued = Vec::new();
    for task in tasks {
        issued.push(task.await.unwrap().unwrap());
    }
    let mut nonces: Vec<u64> = issued.iter().map(|i| i.revocation_nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..24).collect::<Vec<u64>>());
    assert_eq!(pending_count(&h, &did).await, 1);

    // Whatever the first transition missed is in the follow-up.
    confirm_latest(&h, &did).await;
    let next = h.engine.get_current_state(&did).await.unwrap();
    for entry in &issued {
        let proof = h.engine.get_claim_proof(&did, &entry.claim).await.unwrap();
        assert_eq!(proof.claims_root, next.claims_tree_root());
    }
    assert!(pending_count(&h, &did).await <= 1);
}

#[tokio::test]
async fn test_reject_rederives_fresh_transition() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();

    let failed = h.engine.reject(&did, &s1.state_commitment, "reverted").await.unwrap();
    assert_eq!(failed.status, StateStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("reverted"));

    let s2 = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(s2.status, StateStatus::Pending);
    assert_ne!(s2.state_commitment, s1.state_commitment);
    assert_eq!(s2.claims_tree_root(), s1.claims_tree_root());
    assert!(s2.revision > s1.revision);
    assert_eq!(s2.previous_state_commitment, None);

    // The failed state is final.
    assert!(matches!(
        h.engine.confirm(&did, &s1.state_commitment).await,
        Err(EngineError::StateNotPending(_))
    ));
    assert_eq!(
        h.engine.reject(&did, &s1.state_commitment, "again").await.unwrap().status,
        StateStatus::Failed
    );
}

#[tokio::test]
async fn test_confirmation_is_idempotent() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();

    let first = h.engine.confirm(&did, &s1.state_commitment).await.unwrap();
    let again = h.engine.confirm(&did, &s1.state_commitment).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(h.engine.state_history(&did).await.unwrap().len(), 1);

    assert!(matches!(
        h.engine.confirm(&did, &NodeHash::from_u64(1)).await,
        Err(EngineError::UnknownState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_and_rederives() {
    let mut cfg = NodeConfig::default();
    cfg.confirmation_timeout_secs = 60;
    let h = harness(cfg);
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();

    assert_eq!(h.engine.expire_overdue().await.unwrap(), 0);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(h.engine.expire_overdue().await.unwrap(), 1);

    let history = h.engine.state_history(&did).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, StateStatus::Failed);
    assert_eq!(history[0].failure_reason.as_deref(), Some("confirmation timeout"));
    assert_eq!(history[1].status, StateStatus::Pending);
    assert_ne!(history[1].state_commitment, s1.state_commitment);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_watcher_expires_in_background() {
    let mut cfg = NodeConfig::default();
    cfg.confirmation_timeout_secs = 30;
    let h = harness(cfg);
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();

    let watcher = spawn_deadline_watcher(h.engine.clone(), Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(40)).await;
    watcher.abort();

    let history = h.engine.state_history(&did).await.unwrap();
    assert_eq!(history[0].state_commitment, s1.state_commitment);
    assert_eq!(history[0].status, StateStatus::Failed);
    assert!(history.last().unwrap().status == StateStatus::Pending);
}

#[tokio::test]
async fn test_signing_denied_leaves_confirmed_state_intact() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    let confirmed = confirm_latest(&h, &did).await;

    h.vault.suspend(&did).await;
    let err = h.engine.revoke_nonce(&did, 0).await.unwrap_err();
    assert!(matches!(err, EngineError::Key(KeyError::SigningDenied(_))));

    let current = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(current, confirmed);
    // The failed revocation was taken back.
    assert!(!h.engine.is_revoked(&did, 0).await.unwrap());

    // Nothing is left over for the sweep to sign.
    h.vault.resume(&did).await;
    h.engine.expire_overdue().await.unwrap();
    assert_eq!(h.engine.get_current_state(&did).await.unwrap(), confirmed);

    h.engine.revoke_nonce(&did, 0).await.unwrap();
    let retried = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(retried.status, StateStatus::Pending);
    assert_eq!(retried.previous_state_commitment, Some(confirmed.state_commitment));
    assert!(h.engine.is_revoked(&did, 0).await.unwrap());
}

#[tokio::test]
async fn test_claim_retry_after_signing_denied() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.vault.suspend(&did).await;
    let err = h.engine.issue_claim(&did, claim(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Key(KeyError::SigningDenied(_))));
    assert!(matches!(
        h.engine.get_claim_proof(&did, &claim(1)).await,
        Err(EngineError::NotFound)
    ));

    h.vault.resume(&did).await;
    h.engine.expire_overdue().await.unwrap();
    assert!(matches!(h.engine.get_current_state(&did).await, Err(EngineError::NotFound)));

    // Same claim, same gapless nonce, first revision.
    let issued = h.engine.issue_claim(&did, claim(1)).await.unwrap();
    assert_eq!(issued.revocation_nonce, 0);
    let state = h.engine.get_current_state(&did).await.unwrap();
    assert_eq!(state.status, StateStatus::Pending);
    assert_eq!(state.revision, 1);
    let proof = h.engine.get_claim_proof(&did, &issued.claim).await.unwrap();
    assert_eq!(proof.claims_root, state.claims_tree_root());
}

#[tokio::test]
async fn test_missing_key_is_unavailable() {
    let h = harness(NodeConfig::default());
    let did = h.engine.create_identity(ISSUER, KeyType::Ed25519).await.unwrap();

    let err = h.engine.issue_claim(&did, claim(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::Key(KeyError::KeyUnavailable(_))));
    assert!(matches!(h.engine.get_current_state(&did).await, Err(EngineError::NotFound)));

    h.vault.create_key(&did).await;
    let issued = h.engine.issue_claim(&did, claim(1)).await.unwrap();
    assert_eq!(issued.revocation_nonce, 0);
}

#[tokio::test]
async fn test_restarted_engine_resumes_identity() {
    let first = harness(NodeConfig::default());
    let did = issuer(&first).await;
    let one = first.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = confirm_latest(&first, &did).await;

    let second = restarted(&first, NodeConfig::default());
    let did = second.engine.create_identity(ISSUER, KeyType::Ed25519).await.unwrap();
    // Nothing changed since s1, so provisioning again signs nothing.
    assert_eq!(second.engine.get_current_state(&did).await.unwrap(), s1);

    let two = second.engine.issue_claim(&did, claim(2)).await.unwrap();
    assert_eq!(one.revocation_nonce, 0);
    assert_eq!(two.revocation_nonce, 1);
    assert!(matches!(
        second.engine.issue_claim(&did, claim(1)).await,
        Err(EngineError::ClaimExists)
    ));

    let s2 = second.engine.get_current_state(&did).await.unwrap();
    assert_eq!(s2.revision, s1.revision + 1);
    assert_eq!(s2.previous_state_commitment, Some(s1.state_commitment));

    let proof = second
        .engine
        .historical_claim_proof(&did, &one.claim, s2.revision)
        .await
        .unwrap();
    assert_eq!(proof.archived_claims_root, s1.claims_tree_root());
    assert!(proof.verify(&one.claim).is_ok());
}

#[tokio::test]
async fn test_restarted_engine_adopts_pending_state() {
    let first = harness(NodeConfig::default());
    let did = issuer(&first).await;
    first.engine.issue_claim(&did, claim(1)).await.unwrap();
    let s1 = first.engine.get_current_state(&did).await.unwrap();

    let second = restarted(&first, NodeConfig::default());
    let did = second.engine.create_identity(ISSUER, KeyType::Ed25519).await.unwrap();

    // Batched behind the adopted pending state.
    second.engine.issue_claim(&did, claim(2)).await.unwrap();
    assert_eq!(second.engine.state_history(&did).await.unwrap().len(), 1);

    let confirmed = second.engine.confirm(&did, &s1.state_commitment).await.unwrap();
    assert_eq!(confirmed.status, StateStatus::Confirmed);
    let s2 = second.engine.get_current_state(&did).await.unwrap();
    assert_eq!(s2.status, StateStatus::Pending);
    assert_eq!(s2.revision, 2);
    assert_eq!(s2.previous_state_commitment, Some(s1.state_commitment));
}

#[tokio::test]
async fn test_restarted_engine_keeps_nonces_of_unsigned_claims() {
    let first = harness(NodeConfig::default());
    let did = issuer(&first).await;
    first.engine.issue_claim(&did, claim(1)).await.unwrap();
    // Lands while s1 is pending, so no state covers it yet.
    first.engine.issue_claim(&did, claim(2)).await.unwrap();

    let second = restarted(&first, NodeConfig::default());
    let did = second.engine.create_identity(ISSUER, KeyType::Ed25519).await.unwrap();
    let three = second.engine.issue_claim(&did, claim(3)).await.unwrap();
    assert_eq!(three.revocation_nonce, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_continues_past_state_store_errors() {
    let mut cfg = NodeConfig::default();
    cfg.confirmation_timeout_secs = 60;
    let h = harness(cfg);
    let did = issuer(&h).await;
    let other = h
        .engine
        .create_identity("did:iden3:polygon:main:second", KeyType::Ed25519)
        .await
        .unwrap();
    h.vault.create_key(&other).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    h.engine.issue_claim(&other, claim(1)).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    h.states.set_available(false);
    assert_eq!(h.engine.expire_overdue().await.unwrap(), 0);
    h.states.set_available(true);

    // Both are still overdue and get expired on the next sweep.
    assert_eq!(h.engine.expire_overdue().await.unwrap(), 2);
    for identity in [&did, &other] {
        let history = h.engine.state_history(identity).await.unwrap();
        assert_eq!(history[0].status, StateStatus::Failed);
        assert_eq!(history.last().unwrap().status, StateStatus::Pending);
    }
}

#[tokio::test]
async fn test_historical_claims_survive_rotation() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    let mut issued = Vec::new();
    let mut confirmed = Vec::new();
    for subject in 0..4u8 {
        issued.push(h.engine.issue_claim(&did, claim(subject)).await.unwrap().claim);
        confirmed.push(confirm_latest(&h, &did).await);
    }

    // State k+1 archives the claims root of state k.
    for k in 0..3 {
        let revision = confirmed[k + 1].revision;
        let proof = h
            .engine
            .historical_claim_proof(&did, &issued[k], revision)
            .await
            .unwrap();
        assert_eq!(proof.archived_claims_root, confirmed[k].claims_tree_root());
        assert!(proof.verify(&issued[k]).is_ok());
    }

    // Claim 3 did not exist under the root archived at the second transition.
    assert!(matches!(
        h.engine.historical_claim_proof(&did, &issued[3], confirmed[1].revision).await,
        Err(EngineError::NotFound)
    ));
}

#[tokio::test]
async fn test_roots_retention_evicts_old_archives() {
    let mut cfg = NodeConfig::default();
    cfg.roots_retention = Some(2);
    let h = harness(cfg);
    let did = issuer(&h).await;

    let mut issued = Vec::new();
    let mut confirmed = Vec::new();
    for subject in 0..4u8 {
        issued.push(h.engine.issue_claim(&did, claim(subject)).await.unwrap().claim);
        confirmed.push(confirm_latest(&h, &did).await);
    }

    assert!(matches!(
        h.engine.historical_claim_proof(&did, &issued[0], confirmed[1].revision).await,
        Err(EngineError::NotFound)
    ));
    assert!(h
        .engine
        .historical_claim_proof(&did, &issued[2], confirmed[3].revision)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_store_outage_surfaces_and_keeps_nonce() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.nodes.set_available(false);
    let err = h.engine.issue_claim(&did, claim(1)).await.unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));

    h.nodes.set_available(true);
    let issued = h.engine.issue_claim(&did, claim(1)).await.unwrap();
    assert_eq!(issued.revocation_nonce, 0);
}

#[tokio::test]
async fn test_provisioning_errors() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    assert!(matches!(
        h.engine.create_identity(ISSUER, KeyType::Ed25519).await,
        Err(EngineError::IdentityExists(_))
    ));
    assert!(matches!(
        h.engine.create_identity("did:iden3:polygon:main:abc", KeyType::Secp256k1).await,
        Err(EngineError::Key(KeyError::UnknownKeyType(KeyType::Secp256k1)))
    ));
    assert!(matches!(
        h.engine.create_identity("did:web:example:main:abc", KeyType::Ed25519).await,
        Err(EngineError::Did(DidError::UnknownMethod(_)))
    ));

    let stranger: Did = "did:iden3:eth:main:nobody".parse().unwrap();
    assert!(matches!(
        h.engine.issue_claim(&stranger, claim(1)).await,
        Err(EngineError::UnknownIdentity(_))
    ));
    assert!(matches!(
        h.engine.get_non_revocation_proof(&did, 1).await,
        Err(EngineError::NotFound)
    ));
}

#[tokio::test]
async fn test_revocation_input_rules() {
    let mut cfg = NodeConfig::default();
    cfg.nonce_bits = 8;
    let h = harness(cfg);
    let did = issuer(&h).await;

    assert!(matches!(
        h.engine.revoke_nonce(&did, 300).await,
        Err(EngineError::InvalidInput(_))
    ));

    h.engine.revoke_nonce(&did, 5).await.unwrap();
    let s1 = h.engine.get_current_state(&did).await.unwrap();
    // Second revoke writes nothing and starts no transition.
    h.engine.revoke_nonce(&did, 5).await.unwrap();
    assert_eq!(h.engine.state_history(&did).await.unwrap().len(), 1);
    assert_eq!(h.engine.get_current_state(&did).await.unwrap(), s1);
}

#[tokio::test]
async fn test_duplicate_claim_rejected() {
    let h = harness(NodeConfig::default());
    let did = issuer(&h).await;

    h.engine.issue_claim(&did, claim(1)).await.unwrap();
    assert!(matches!(
        h.engine.issue_claim(&did, claim(1)).await,
        Err(EngineError::ClaimExists)
    ));
    // The gapless counter did not move for the rejected claim.
    assert_eq!(h.engine.issue_claim(&did, claim(2)).await.unwrap().revocation_nonce, 1);
}
