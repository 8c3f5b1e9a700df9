// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reverse hash publisher.
//!
//! A bounded queue feeds a single scheduler task. Jobs for one identity are
//! delivered strictly in order; different identities are served round-robin.
//! Delivery failures never reach the issuer: they end as a `Degraded`
//! publish status on the state record plus a [`PublishEvent`].

pub mod job;
pub mod retry;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use idstate_kernel::types::NodeHash;

use crate::config::{PublisherConfig, RhsMode};
use crate::did::Did;
use crate::errors::PublishError;
use crate::network::{HttpRhsClient, RhsClient};
use crate::state::PublishStatus;
use crate::store::StateStore;

pub use job::PublishJob;
pub use retry::{CircuitBreaker, RetryPolicy};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishEvent {
    Published { identity: Did, state: NodeHash },
    Retrying { identity: Did, state: NodeHash, attempt: u32, delay: Duration },
    Degraded { identity: Did, state: NodeHash, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Keep delivering until every queued job succeeds or exhausts its retries.
    Drain,
    /// Mark every queued job degraded and stop.
    Discard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pending: usize,
    pub discarded: usize,
}

enum Command {
    Enqueue(PublishJob),
    Shutdown(ShutdownPolicy, oneshot::Sender<ShutdownReport>),
}

/// Cheap to clone. A disabled handle accepts and ignores every job.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: Option<mpsc::Sender<Command>>,
    events: broadcast::Sender<PublishEvent>,
    states: Arc<dyn StateStore>,
}

impl PublisherHandle {
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.events.subscribe()
    }

    /// Never waits for delivery. A full or closed queue degrades the job.
    pub async fn enqueue(&self, job: PublishJob) -> PublishStatus {
        let Some(tx) = &self.tx else {
            return PublishStatus::Disabled;
        };
        let identity = job.identity.clone();
        let state = job.state;
        match tx.try_send(Command::Enqueue(job)) {
            Ok(()) => PublishStatus::Queued,
            Err(err) => {
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "publish queue full",
                    mpsc::error::TrySendError::Closed(_) => "publisher stopped",
                };
                degrade(&self.states, &self.events, &identity, &state, reason).await;
                PublishStatus::Degraded
            }
        }
    }

    pub async fn shutdown(&self, policy: ShutdownPolicy) -> ShutdownReport {
        let Some(tx) = &self.tx else {
            return ShutdownReport::default();
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Command::Shutdown(policy, ack_tx)).await.is_err() {
            return ShutdownReport::default();
        }
        ack_rx.await.unwrap_or_default()
    }
}

pub struct Publisher;

impl Publisher {
    pub fn disabled(states: Arc<dyn StateStore>) -> PublisherHandle {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        PublisherHandle { tx: None, events, states }
    }

    /// Build from config: `Disabled` yields a no-op handle, `Http` spawns a worker.
    pub fn from_config(cfg: &PublisherConfig, states: Arc<dyn StateStore>) -> Result<PublisherHandle, PublishError> {
        match &cfg.mode {
            RhsMode::Disabled => {
                info!("rhs publishing disabled");
                Ok(Self::disabled(states))
            }
            RhsMode::Http { url } => {
                let client = HttpRhsClient::new(url, cfg.request_timeout())?;
                info!(url = %client.base_url(), "rhs publishing enabled");
                Ok(Self::spawn(cfg, Arc::new(client), states))
            }
        }
    }

    /// Spawn the scheduler on the current runtime.
    pub fn spawn(cfg: &PublisherConfig, client: Arc<dyn RhsClient>, states: Arc<dyn StateStore>) -> PublisherHandle {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = Worker {
            batch_size: cfg.batch_size.max(1),
            retry: RetryPolicy::from_config(cfg),
            breaker: CircuitBreaker::new(cfg.breaker_threshold, cfg.breaker_cooldown()),
            client,
            states: states.clone(),
            events: events.clone(),
            queues: HashMap::new(),
            order: VecDeque::new(),
        };
        tokio::spawn(worker.run(rx));

        PublisherHandle { tx: Some(tx), events, states }
    }
}

async fn degrade(
    states: &Arc<dyn StateStore>,
    events: &broadcast::Sender<PublishEvent>,
    identity: &Did,
    state: &NodeHash,
    reason: &str,
) {
    warn!(%identity, %state, reason, "publish degraded");
    metrics::counter!("idstate_publish_degraded_total", 1);
    if let Err(e) = states.mark_publish(identity, state, PublishStatus::Degraded).await {
        warn!(%identity, %state, "failed to record degraded publish: {}", e);
    }
    let _ = events.send(PublishEvent::Degraded {
        identity: identity.clone(),
        state: *state,
        reason: reason.to_string(),
    });
}

enum Outcome {
    Done,
    Retry,
}

struct Worker {
    batch_size: usize,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    client: Arc<dyn RhsClient>,
    states: Arc<dyn StateStore>,
    events: broadcast::Sender<PublishEvent>,
    queues: HashMap<Did, VecDeque<PublishJob>>,
    /// Identities with queued work, in service order.
    order: VecDeque<Did>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let wake = self.next_wake();
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Enqueue(job)) => self.push(job),
                    Some(Command::Shutdown(policy, ack)) => {
                        let report = self.shutdown(policy, &mut rx).await;
                        let _ = ack.send(report);
                        return;
                    }
                    None => {
                        self.shutdown(ShutdownPolicy::Discard, &mut rx).await;
                        return;
                    }
                },
                _ = sleep_until_opt(wake), if wake.is_some() => self.run_due().await,
            }
        }
    }

    fn push(&mut self, job: PublishJob) {
        debug!(identity = %job.identity, state = %job.state, nodes = job.changed_nodes.len(), "publish job queued");
        let queue = self.queues.entry(job.identity.clone()).or_default();
        if queue.is_empty() {
            self.order.push_back(job.identity.clone());
        }
        queue.push_back(job);
        self.report_depth();
    }

    fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn report_depth(&self) {
        metrics::gauge!("idstate_publish_queue_depth", self.pending() as f64);
    }

    /// Earliest instant at which some head-of-queue job can be attempted.
    fn next_wake(&self) -> Option<Instant> {
        let now = Instant::now();
        let earliest = self
            .order
            .iter()
            .filter_map(|identity| self.queues.get(identity).and_then(VecDeque::front))
            .map(|job| job.next_retry_at.unwrap_or(now))
            .min()?;
        Some(match self.breaker.open_until() {
            Some(until) if until > earliest => until,
            _ => earliest,
        })
    }

    /// One pass over every identity, attempting its head job if due.
    async fn run_due(&mut self) {
        let identities: Vec<Did> = self.order.iter().cloned().collect();
        for identity in identities {
            let now = Instant::now();
            if self.breaker.is_open(now) {
                return;
            }
            let Some(mut job) = self.queues.get_mut(&identity).and_then(VecDeque::pop_front) else {
                continue;
            };
            if !job.is_due(now) {
                self.requeue_front(job);
                continue;
            }
            match self.attempt(&mut job).await {
                Outcome::Retry => self.requeue_front(job),
                Outcome::Done => self.finish(&identity),
            }
        }
        self.report_depth();
    }

    fn requeue_front(&mut self, job: PublishJob) {
        self.queues.entry(job.identity.clone()).or_default().push_front(job);
    }

    fn finish(&mut self, identity: &Did) {
        if self.queues.get(identity).is_some_and(VecDeque::is_empty) {
            self.queues.remove(identity);
            self.order.retain(|id| id != identity);
        }
    }

    async fn attempt(&mut self, job: &mut PublishJob) -> Outcome {
        metrics::counter!("idstate_publish_attempts_total", 1);
        match self.deliver(job).await {
            Ok(()) => {
                self.breaker.record_success();
                info!(identity = %job.identity, state = %job.state, "state published to rhs");
                if let Err(e) = self.states.mark_publish(&job.identity, &job.state, PublishStatus::Published).await {
                    warn!(identity = %job.identity, "failed to record publish: {}", e);
                }
                let _ = self.events.send(PublishEvent::Published {
                    identity: job.identity.clone(),
                    state: job.state,
                });
                Outcome::Done
            }
            Err(PublishError::Permanent(reason)) => {
                self.breaker.record_success();
                degrade(&self.states, &self.events, &job.identity, &job.state, &reason).await;
                Outcome::Done
            }
            Err(PublishError::Transient(reason)) => {
                let now = Instant::now();
                self.breaker.record_failure(now);
                job.attempts += 1;
                if self.retry.exhausted(job.attempts) {
                    let reason = format!("retries exhausted after {} attempts: {}", job.attempts, reason);
                    degrade(&self.states, &self.events, &job.identity, &job.state, &reason).await;
                    return Outcome::Done;
                }
                let delay = self.retry.delay(job.attempts - 1);
                job.next_retry_at = Some(now + delay);
                warn!(identity = %job.identity, attempt = job.attempts, ?delay, "rhs delivery failed: {}", reason);
                let _ = self.events.send(PublishEvent::Retrying {
                    identity: job.identity.clone(),
                    state: job.state,
                    attempt: job.attempts,
                    delay,
                });
                Outcome::Retry
            }
        }
    }

    /// Send remaining batches, resuming after those already accepted.
    async fn deliver(&self, job: &mut PublishJob) -> Result<(), PublishError> {
        let records = job.records();
        while job.delivered() < records.len() {
            let start = job.delivered();
            let end = (start + self.batch_size).min(records.len());
            self.client.save_nodes(&records[start..end]).await?;
            job.advance(end - start);
        }
        Ok(())
    }

    async fn shutdown(&mut self, policy: ShutdownPolicy, rx: &mut mpsc::Receiver<Command>) -> ShutdownReport {
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Enqueue(job) => self.push(job),
                Command::Shutdown(_, ack) => {
                    let _ = ack.send(ShutdownReport::default());
                }
            }
        }

        let pending = self.pending();
        info!(pending, ?policy, "publisher shutting down");
        let mut report = ShutdownReport { pending, discarded: 0 };

        match policy {
            ShutdownPolicy::Drain => {
                while let Some(wake) = self.next_wake() {
                    tokio::time::sleep_until(wake).await;
                    self.run_due().await;
                }
            }
            ShutdownPolicy::Discard => {
                let jobs: Vec<PublishJob> = self.queues.drain().flat_map(|(_, q)| q).collect();
                self.order.clear();
                for job in jobs {
                    degrade(&self.states, &self.events, &job.identity, &job.state, "discarded at shutdown").await;
                    report.discarded += 1;
                }
            }
        }
        self.report_depth();
        report
    }
}

async fn sleep_until_opt(wake: Option<Instant>) {
    match wake {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
