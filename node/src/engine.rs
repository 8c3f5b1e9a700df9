// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity state engine.
//!
//! Each identity owns a claims, revocation and roots tree plus a lifecycle
//! `NoState -> Pending -> Confirmed | Failed`. Work for one identity is
//! serialized by a per-identity mutex that is never held across the signing
//! call; different identities share no lock beyond the map lookup.
//!
//! Mutations commit to the node store immediately and mark the identity
//! dirty. A transition is started whenever the identity is dirty and has no
//! pending (or in-flight) transition, so mutations that arrive while a state
//! is pending are batched into the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use idstate_kernel::claim::ClaimEntry;
use idstate_kernel::commitment::transition_message;
use idstate_kernel::types::key::{nonce_key, revision_key};
use idstate_kernel::types::{NodeHash, TreeKind};
use idstate_kernel::verify::{verify_claim, HistoricalClaimProof, NonRevocationProof};
use idstate_kernel::{MerkleNode, MerkleProof, StateRoots};

use crate::config::{NodeConfig, NoncePolicy};
use crate::did::{Did, DidMethodTable};
use crate::errors::{EngineError, KeyError};
use crate::keys::{KeyManager, KeyType, Signature};
use crate::publisher::{PublishJob, PublisherHandle};
use crate::revocation::{self, NonceAllocator};
use crate::smt::SparseMerkleTree;
use crate::state::{unix_now, IdentityState, PublishStatus, StateStatus};
use crate::store::{NodeStore, StateStore};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_levels: u16,
    pub nonce_policy: NoncePolicy,
    pub nonce_bits: u8,
    pub roots_retention: Option<u64>,
    pub confirmation_timeout: Duration,
}

impl From<&NodeConfig> for EngineSettings {
    fn from(cfg: &NodeConfig) -> Self {
        Self {
            max_levels: cfg.max_levels,
            nonce_policy: cfg.nonce_policy,
            nonce_bits: cfg.nonce_bits,
            roots_retention: cfg.roots_retention,
            confirmation_timeout: cfg.confirmation_timeout(),
        }
    }
}

/// Result of [`StateEngine::issue_claim`]: the claim as stored, nonce filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedClaim {
    pub claim: ClaimEntry,
    pub revocation_nonce: u64,
}

/// Inclusion proof of a claim under the current claims root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimProof {
    pub claims_root: NodeHash,
    pub proof: MerkleProof,
}

#[derive(Debug, Clone, Copy)]
struct ConfirmedState {
    commitment: NodeHash,
    roots: StateRoots,
}

#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    commitment: NodeHash,
    revision: u64,
    roots: StateRoots,
    deadline: Instant,
}

/// The caller's own write, undone when the transition it started aborts.
#[derive(Debug, Clone, Copy)]
enum Undo {
    Claim { key: NodeHash, nonce: u64 },
    Revocation { nonce: u64 },
}

/// Output of the locked compute step, consumed after signing.
struct Prepared {
    did: Did,
    key_type: KeyType,
    revision: u64,
    roots: StateRoots,
    commitment: NodeHash,
    previous: Option<NodeHash>,
    changes: [Vec<MerkleNode>; 3],
    started: Instant,
}

struct IdentityCell {
    did: Did,
    key_type: KeyType,
    claims: SparseMerkleTree,
    revocations: SparseMerkleTree,
    roots: SparseMerkleTree,
    nonces: NonceAllocator,
    next_revision: u64,
    oldest_archive: u64,
    last_confirmed: Option<ConfirmedState>,
    pending: Option<PendingTransition>,
    in_flight: bool,
    dirty: bool,
}

impl IdentityCell {
    fn can_transition(&self) -> bool {
        self.dirty && self.pending.is_none() && !self.in_flight
    }

    /// Whether the committed claims or revocation tree moved past `covered`.
    fn uncovered(&self, covered: Option<StateRoots>) -> bool {
        let (claims, revocation) = covered.map_or((NodeHash::ZERO, NodeHash::ZERO), |r| (r.claims, r.revocation));
        self.claims.committed_root() != claims || self.revocations.committed_root() != revocation
    }

    /// Rebuild lifecycle bookkeeping from persisted state records.
    fn resume(&mut self, history: &[IdentityState], settings: &EngineSettings) {
        let last_revision = history.iter().map(|s| s.revision).max().unwrap_or(0);
        self.next_revision = last_revision + 1;
        if let Some(keep) = settings.roots_retention {
            self.oldest_archive = (last_revision + 1).saturating_sub(keep).max(1);
        }

        self.last_confirmed = history
            .iter()
            .rev()
            .find(|s| s.status == StateStatus::Confirmed)
            .map(|s| ConfirmedState { commitment: s.state_commitment, roots: s.roots });
        self.pending = history.iter().rev().find(|s| s.status == StateStatus::Pending).map(|s| {
            let age = Duration::from_secs(unix_now().saturating_sub(s.created_at));
            PendingTransition {
                commitment: s.state_commitment,
                revision: s.revision,
                roots: s.roots,
                deadline: Instant::now() + settings.confirmation_timeout.saturating_sub(age),
            }
        });

        let covered = self.pending.map(|p| p.roots).or(self.last_confirmed.map(|s| s.roots));
        let failed_last = history.last().is_some_and(|s| s.status == StateStatus::Failed);
        self.dirty = (self.pending.is_none() && failed_last) || self.uncovered(covered);
    }

    fn restore_changes(&mut self, changes: [Vec<MerkleNode>; 3]) {
        let [claims, revocations, roots] = changes;
        self.claims.restore_changes(claims);
        self.revocations.restore_changes(revocations);
        self.roots.restore_changes(roots);
    }
}

pub struct StateEngine {
    settings: EngineSettings,
    nodes: Arc<dyn NodeStore>,
    states: Arc<dyn StateStore>,
    keys: Arc<KeyManager>,
    dids: Arc<DidMethodTable>,
    publisher: PublisherHandle,
    identities: RwLock<HashMap<Did, Arc<Mutex<IdentityCell>>>>,
}

impl StateEngine {
    pub fn new(
        settings: EngineSettings,
        nodes: Arc<dyn NodeStore>,
        states: Arc<dyn StateStore>,
        keys: Arc<KeyManager>,
        dids: Arc<DidMethodTable>,
        publisher: PublisherHandle,
    ) -> Self {
        Self {
            settings,
            nodes,
            states,
            keys,
            dids,
            publisher,
            identities: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn publisher(&self) -> &PublisherHandle {
        &self.publisher
    }

    pub fn did_methods(&self) -> &DidMethodTable {
        &self.dids
    }

    /// Provision an identity. It stays in `NoState` until its first mutation.
    ///
    /// An identity the stores already hold is resumed: trees, nonce
    /// high-water mark, revision counter and lifecycle come back from disk.
    pub async fn create_identity(&self, did: &str, key_type: KeyType) -> Result<Did, EngineError> {
        let did = self.dids.parse(did)?;
        if !self.keys.supports(key_type) {
            return Err(KeyError::UnknownKeyType(key_type).into());
        }

        let mut identities = self.identities.write().await;
        if identities.contains_key(&did) {
            return Err(EngineError::IdentityExists(did.to_string()));
        }

        let levels = self.settings.max_levels;
        let claims = SparseMerkleTree::open(self.nodes.clone(), did.clone(), TreeKind::Claims, levels).await?;
        let revocations = SparseMerkleTree::open(self.nodes.clone(), did.clone(), TreeKind::Revocation, levels).await?;
        let roots = SparseMerkleTree::open(self.nodes.clone(), did.clone(), TreeKind::Roots, levels).await?;
        let history = self.states.history(&did).await?;
        let highest = self.states.highest_nonce(&did).await?;

        let mut cell = IdentityCell {
            did: did.clone(),
            key_type,
            claims,
            revocations,
            roots,
            nonces: NonceAllocator::resume(self.settings.nonce_policy, self.settings.nonce_bits, highest),
            next_revision: 1,
            oldest_archive: 1,
            last_confirmed: None,
            pending: None,
            in_flight: false,
            dirty: false,
        };
        cell.resume(&history, &self.settings);

        if history.is_empty() && highest.is_none() && !cell.dirty {
            info!(identity = %did, %key_type, "identity provisioned");
        } else {
            info!(
                identity = %did,
                %key_type,
                revision = cell.next_revision - 1,
                pending = cell.pending.is_some(),
                dirty = cell.dirty,
                "identity resumed"
            );
        }
        identities.insert(did.clone(), Arc::new(Mutex::new(cell)));
        Ok(did)
    }

    /// Insert a claim with a freshly reserved revocation nonce.
    ///
    /// The claim is durable once this returns `Ok`. If the transition it
    /// starts aborts, the claim is removed again before the error is
    /// returned, so the same claim can be retried.
    pub async fn issue_claim(&self, did: &Did, mut claim: ClaimEntry) -> Result<IssuedClaim, EngineError> {
        let cell = self.cell(did).await?;
        {
            let mut guard = cell.lock().await;
            let c = &mut *guard;

            let reservation = c.nonces.reserve()?;
            claim.set_revocation_nonce(reservation.nonce());
            let key = claim.tree_key();
            if c.claims.get(&key).await?.is_some() {
                return Err(EngineError::ClaimExists);
            }
            self.states.record_nonce(did, reservation.nonce()).await?;

            let applied = match c.claims.put(key, claim.value_hash()).await {
                Ok(_) => c.claims.commit().await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = applied {
                c.claims.rollback();
                return Err(e);
            }
            c.nonces.commit(reservation)?;
            c.dirty = true;
            debug!(identity = %did, nonce = reservation.nonce(), root = %c.claims.root(), "claim inserted");
        }
        metrics::counter!("idstate_claims_issued_total", 1);

        let revocation_nonce = claim.revocation_nonce();
        let undo = Undo::Claim {
            key: claim.tree_key(),
            nonce: revocation_nonce,
        };
        self.drive(&cell, Some(undo)).await?;
        Ok(IssuedClaim { claim, revocation_nonce })
    }

    /// Mark `nonce` revoked. Revoking twice is a successful no-op.
    ///
    /// Like [`issue_claim`](Self::issue_claim), an aborted transition
    /// removes the revocation again.
    pub async fn revoke_nonce(&self, did: &Did, nonce: u64) -> Result<(), EngineError> {
        let cell = self.cell(did).await?;
        let changed = {
            let mut guard = cell.lock().await;
            let c = &mut *guard;
            if !c.nonces.in_range(nonce) {
                return Err(EngineError::InvalidInput(format!(
                    "nonce {} exceeds {}-bit nonce space",
                    nonce,
                    c.nonces.bits()
                )));
            }

            let changed = match revocation::revoke(&mut c.revocations, nonce, unix_now()).await {
                Ok(true) => c.revocations.commit().await.map(|_| true),
                other => other,
            };
            let changed = match changed {
                Ok(changed) => changed,
                Err(e) => {
                    c.revocations.rollback();
                    return Err(e);
                }
            };
            if changed {
                c.dirty = true;
                info!(identity = %did, nonce, "nonce revoked");
            }
            changed
        };

        if changed {
            metrics::counter!("idstate_revocations_total", 1);
            self.drive(&cell, Some(Undo::Revocation { nonce })).await?;
        }
        Ok(())
    }

    /// Revocation status in the local revocation tree, including mutations
    /// not yet covered by a state.
    pub async fn is_revoked(&self, did: &Did, nonce: u64) -> Result<bool, EngineError> {
        let cell = self.cell(did).await?;
        let root = cell.lock().await.revocations.committed_root();
        let tree = SparseMerkleTree::at_root(
            self.nodes.clone(),
            did.clone(),
            TreeKind::Revocation,
            root,
            self.settings.max_levels,
        );
        let (revoked, _) = revocation::status(&tree, nonce).await?;
        Ok(revoked)
    }

    /// Proof of the nonce's status bound to the newest signed state
    /// (pending or confirmed).
    pub async fn get_non_revocation_proof(&self, did: &Did, nonce: u64) -> Result<NonRevocationProof, EngineError> {
        self.cell(did).await?;
        let state = self.bound_state(did).await?;
        let tree = SparseMerkleTree::at_root(
            self.nodes.clone(),
            did.clone(),
            TreeKind::Revocation,
            state.roots.revocation,
            self.settings.max_levels,
        );
        let (_, proof) = revocation::status(&tree, nonce).await?;
        let bundle = NonRevocationProof {
            nonce,
            issuer: state.roots,
            state: state.state_commitment,
            proof,
        };
        bundle.verify()?;
        Ok(bundle)
    }

    /// Newest state record. `NotFound` while the identity is in `NoState`.
    pub async fn get_current_state(&self, did: &Did) -> Result<IdentityState, EngineError> {
        self.cell(did).await?;
        self.states.latest(did).await?.ok_or(EngineError::NotFound)
    }

    pub async fn state_history(&self, did: &Did) -> Result<Vec<IdentityState>, EngineError> {
        self.cell(did).await?;
        Ok(self.states.history(did).await?)
    }

    pub async fn get_claim_proof(&self, did: &Did, claim: &ClaimEntry) -> Result<ClaimProof, EngineError> {
        let cell = self.cell(did).await?;
        let claims_root = cell.lock().await.claims.committed_root();
        let tree = SparseMerkleTree::at_root(
            self.nodes.clone(),
            did.clone(),
            TreeKind::Claims,
            claims_root,
            self.settings.max_levels,
        );
        let key = claim.tree_key();
        let proof = tree.proof(&key).await?;
        proof.verify(&claims_root, &key)?;
        if !proof.existence {
            return Err(EngineError::NotFound);
        }
        verify_claim(&proof, &claims_root, claim)?;
        Ok(ClaimProof { claims_root, proof })
    }

    /// Prove `claim` under the claims root archived at `revision`, against the
    /// roots tree of the newest signed state.
    pub async fn historical_claim_proof(
        &self,
        did: &Did,
        claim: &ClaimEntry,
        revision: u64,
    ) -> Result<HistoricalClaimProof, EngineError> {
        self.cell(did).await?;
        let state = self.bound_state(did).await?;
        let levels = self.settings.max_levels;

        let roots_tree =
            SparseMerkleTree::at_root(self.nodes.clone(), did.clone(), TreeKind::Roots, state.roots.roots, levels);
        let root_proof = roots_tree.proof(&revision_key(revision)).await?;
        root_proof.verify(&state.roots.roots, &revision_key(revision))?;
        let archived = root_proof.value().ok_or(EngineError::NotFound)?;

        let claims_tree = SparseMerkleTree::at_root(self.nodes.clone(), did.clone(), TreeKind::Claims, archived, levels);
        let key = claim.tree_key();
        let claim_proof = claims_tree.proof(&key).await?;
        if claim_proof.value() != Some(claim.value_hash()) {
            return Err(EngineError::NotFound);
        }

        let bundle = HistoricalClaimProof {
            revision,
            archived_claims_root: archived,
            roots_root: state.roots.roots,
            root_proof,
            claim_proof,
        };
        bundle.verify(claim)?;
        Ok(bundle)
    }

    /// Apply an external confirmation. Confirming an already confirmed state
    /// returns it unchanged.
    pub async fn confirm(&self, did: &Did, commitment: &NodeHash) -> Result<IdentityState, EngineError> {
        let cell = self.cell(did).await?;
        let confirmed = {
            let mut c = cell.lock().await;
            let current = c.pending;
            match current {
                Some(p) if p.commitment == *commitment => {
                    let state = self
                        .states
                        .update_status(did, commitment, StateStatus::Confirmed, None)
                        .await?
                        .ok_or_else(|| unknown_state(did, commitment))?;
                    c.last_confirmed = Some(ConfirmedState { commitment: p.commitment, roots: p.roots });
                    c.pending = None;
                    state
                }
                _ => return self.resolved(did, commitment, StateStatus::Confirmed).await,
            }
        };
        metrics::counter!("idstate_transitions_total", 1, "status" => "confirmed");
        info!(identity = %did, state = %commitment, revision = confirmed.revision, "state confirmed");

        self.drive_logged(&cell).await;
        Ok(confirmed)
    }

    /// Apply an external rejection and re-derive a fresh transition.
    pub async fn reject(&self, did: &Did, commitment: &NodeHash, reason: &str) -> Result<IdentityState, EngineError> {
        let cell = self.cell(did).await?;
        let failed = {
            let mut c = cell.lock().await;
            let current = c.pending;
            match current {
                Some(p) if p.commitment == *commitment => self.fail_pending(&mut c, reason).await?,
                _ => return self.resolved(did, commitment, StateStatus::Failed).await,
            }
        };
        self.drive_logged(&cell).await;
        Ok(failed)
    }

    /// Fail every pending state past its confirmation deadline and re-derive.
    ///
    /// Also retries identities whose last transition attempt was aborted.
    pub async fn expire_overdue(&self) -> Result<usize, EngineError> {
        let cells: Vec<Arc<Mutex<IdentityCell>>> = self.identities.read().await.values().cloned().collect();
        let now = Instant::now();
        let mut expired = 0;

        for cell in cells {
            let needs_drive = {
                let mut c = cell.lock().await;
                if c.pending.is_some_and(|p| p.deadline <= now) {
                    match self.fail_pending(&mut c, "confirmation timeout").await {
                        Ok(_) => expired += 1,
                        Err(e) => error!(identity = %c.did, "failed to expire pending state: {}", e),
                    }
                }
                c.can_transition()
            };
            if needs_drive {
                self.drive_logged(&cell).await;
            }
        }
        if expired > 0 {
            info!(expired, "expired overdue transitions");
        }
        Ok(expired)
    }

    async fn cell(&self, did: &Did) -> Result<Arc<Mutex<IdentityCell>>, EngineError> {
        self.identities
            .read()
            .await
            .get(did)
            .cloned()
            .ok_or_else(|| EngineError::UnknownIdentity(did.to_string()))
    }

    /// Newest state that is not `Failed`.
    async fn bound_state(&self, did: &Did) -> Result<IdentityState, EngineError> {
        let history = self.states.history(did).await?;
        history
            .into_iter()
            .rev()
            .find(|s| s.status != StateStatus::Failed)
            .ok_or(EngineError::NotFound)
    }

    /// Confirm/reject for a commitment that is not the current pending one.
    async fn resolved(&self, did: &Did, commitment: &NodeHash, wanted: StateStatus) -> Result<IdentityState, EngineError> {
        match self.states.get(did, commitment).await? {
            Some(state) if state.status == wanted => {
                debug!(identity = %did, state = %commitment, status = %wanted, "already applied");
                Ok(state)
            }
            Some(_) => Err(EngineError::StateNotPending(*commitment)),
            None => Err(unknown_state(did, commitment)),
        }
    }

    async fn fail_pending(&self, c: &mut IdentityCell, reason: &str) -> Result<IdentityState, EngineError> {
        let Some(p) = c.pending else {
            return Err(EngineError::NotFound);
        };
        let state = self
            .states
            .update_status(&c.did, &p.commitment, StateStatus::Failed, Some(reason.to_string()))
            .await?
            .ok_or_else(|| unknown_state(&c.did, &p.commitment))?;
        c.pending = None;
        // Re-derive from the last confirmed state even without new mutations.
        c.dirty = true;
        metrics::counter!("idstate_transitions_total", 1, "status" => "failed");
        warn!(identity = %c.did, state = %p.commitment, revision = p.revision, reason, "transition failed");
        Ok(state)
    }

    async fn drive_logged(&self, cell: &Arc<Mutex<IdentityCell>>) {
        if let Err(e) = self.drive(cell, None).await {
            error!("transition aborted: {}", e);
        }
    }

    /// Start the next transition if the identity is dirty and idle.
    ///
    /// On abort, `undo` is reverted under the same lock that aborts.
    async fn drive(
        &self,
        cell: &Arc<Mutex<IdentityCell>>,
        undo: Option<Undo>,
    ) -> Result<Option<IdentityState>, EngineError> {
        let prepared = {
            let mut c = cell.lock().await;
            if !c.can_transition() {
                return Ok(None);
            }
            match self.prepare(&mut c).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.revert(&mut c, undo).await;
                    return Err(e);
                }
            }
        };

        let message = transition_message(prepared.previous.as_ref(), &prepared.commitment);
        let signed = self.keys.sign(prepared.key_type, &prepared.did, &message).await;

        let mut c = cell.lock().await;
        c.in_flight = false;
        let signature = match signed {
            Ok(signature) => signature,
            Err(e) => {
                warn!(identity = %prepared.did, revision = prepared.revision, "transition signing failed: {}", e);
                self.abort(&mut c, prepared);
                self.revert(&mut c, undo).await;
                return Err(e.into());
            }
        };
        match self.record_pending(&mut c, prepared, signature).await {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                self.revert(&mut c, undo).await;
                Err(e)
            }
        }
    }

    /// Remove a mutation whose transition aborted. The identity stays dirty
    /// only if something else is still uncovered.
    async fn revert(&self, c: &mut IdentityCell, undo: Option<Undo>) {
        let Some(undo) = undo else {
            return;
        };
        let reverted = match undo {
            Undo::Claim { key, nonce } => {
                let reverted = remove_committed(&mut c.claims, &key).await;
                if reverted.is_ok() {
                    c.nonces.release(nonce);
                }
                reverted
            }
            Undo::Revocation { nonce } => remove_committed(&mut c.revocations, &nonce_key(nonce)).await,
        };
        match reverted {
            Ok(()) => {
                c.dirty = c.uncovered(c.last_confirmed.map(|s| s.roots));
                debug!(identity = %c.did, ?undo, dirty = c.dirty, "aborted mutation reverted");
            }
            Err(e) => error!(identity = %c.did, ?undo, "failed to revert aborted mutation: {}", e),
        }
    }

    /// Locked compute step: archive, retention, commitment, change capture.
    async fn prepare(&self, c: &mut IdentityCell) -> Result<Prepared, EngineError> {
        let started = Instant::now();
        let revision = c.next_revision;
        c.next_revision += 1;
        c.dirty = false;

        if let Err(e) = self.archive(c, revision).await {
            c.roots.rollback();
            c.next_revision = revision;
            c.dirty = true;
            return Err(e);
        }

        let roots = StateRoots::new(
            c.claims.committed_root(),
            c.revocations.committed_root(),
            c.roots.committed_root(),
        );
        let changes = [c.claims.take_changes(), c.revocations.take_changes(), c.roots.take_changes()];
        c.in_flight = true;

        Ok(Prepared {
            did: c.did.clone(),
            key_type: c.key_type,
            revision,
            roots,
            commitment: roots.commitment(),
            previous: c.last_confirmed.map(|s| s.commitment),
            changes,
            started,
        })
    }

    /// Append the previous confirmed claims root at `revision`, evicting
    /// archives that fall out of the retention window.
    async fn archive(&self, c: &mut IdentityCell, revision: u64) -> Result<(), EngineError> {
        let previous_claims = c.last_confirmed.map(|s| s.roots.claims).unwrap_or(NodeHash::ZERO);
        c.roots.put(revision_key(revision), previous_claims).await?;

        if let Some(keep) = self.settings.roots_retention {
            while c.oldest_archive + keep <= revision {
                match c.roots.delete(&revision_key(c.oldest_archive)).await {
                    Ok(_) | Err(EngineError::NotFound) => {}
                    Err(e) => return Err(e),
                }
                debug!(identity = %c.did, revision = c.oldest_archive, "archive evicted");
                c.oldest_archive += 1;
            }
        }
        c.roots.commit().await?;
        Ok(())
    }

    fn abort(&self, c: &mut IdentityCell, prepared: Prepared) {
        c.restore_changes(prepared.changes);
        // Reusing the revision re-puts an identical archive leaf.
        c.next_revision = prepared.revision;
        c.dirty = true;
    }

    async fn record_pending(
        &self,
        c: &mut IdentityCell,
        prepared: Prepared,
        signature: Signature,
    ) -> Result<IdentityState, EngineError> {
        let publish = if self.publisher.is_enabled() {
            PublishStatus::Queued
        } else {
            PublishStatus::Disabled
        };
        let mut state = IdentityState {
            identity: prepared.did.clone(),
            revision: prepared.revision,
            roots: prepared.roots,
            state_commitment: prepared.commitment,
            previous_state_commitment: prepared.previous,
            status: StateStatus::Pending,
            publish,
            created_at: unix_now(),
            transition_proof: signature,
            failure_reason: None,
        };

        if let Err(e) = self.states.put_state(state.clone()).await {
            warn!(identity = %prepared.did, "failed to persist pending state: {}", e);
            self.abort(c, prepared);
            return Err(e.into());
        }

        c.pending = Some(PendingTransition {
            commitment: prepared.commitment,
            revision: prepared.revision,
            roots: prepared.roots,
            deadline: Instant::now() + self.settings.confirmation_timeout,
        });

        let [claims, revocations, roots] = prepared.changes;
        let mut changed = claims;
        changed.extend(revocations);
        changed.extend(roots);
        let job = PublishJob::new(prepared.did.clone(), prepared.commitment, prepared.roots, changed);
        state.publish = self.publisher.enqueue(job).await;

        metrics::counter!("idstate_transitions_total", 1, "status" => "pending");
        metrics::histogram!(
            "idstate_transition_duration_seconds",
            prepared.started.elapsed().as_secs_f64()
        );
        info!(
            identity = %prepared.did,
            state = %prepared.commitment,
            revision = prepared.revision,
            "transition pending"
        );
        Ok(state)
    }
}

async fn remove_committed(tree: &mut SparseMerkleTree, key: &NodeHash) -> Result<(), EngineError> {
    let removed = match tree.delete(key).await {
        Ok(_) => tree.commit().await.map(|_| ()),
        Err(e) => Err(e),
    };
    if removed.is_err() {
        tree.rollback();
    }
    removed
}

fn unknown_state(did: &Did, commitment: &NodeHash) -> EngineError {
    EngineError::UnknownState {
        identity: did.to_string(),
        commitment: *commitment,
    }
}

/// Periodically run [`StateEngine::expire_overdue`].
pub fn spawn_deadline_watcher(engine: Arc<StateEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = engine.expire_overdue().await {
                error!("deadline check failed: {}", e);
            }
        }
    })
}
