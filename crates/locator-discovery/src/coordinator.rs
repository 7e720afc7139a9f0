// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery coordinator.
//!
//! Owns the cached locator, the single in-flight discovery round and the
//! reconciliation of replies.
//!
//! # State
//!
//! ```text
//!              round succeeds                 invalidate(current)
//! Retryable ─────────────────────► Resolved ─────────────────────► Retryable
//!     │                               ▲
//!     │ round exhausted               │ late reply accepted
//!     ▼                               │
//! CoolingDown{until} ─────────────────┘
//!     │ deadline passed (checked lazily by resolve)
//!     ▼
//! Retryable
//! ```
//!
//! All state lives behind one mutex that is never held across an `.await`.
//! A round runs on its own task; callers of [`DiscoveryCoordinator::resolve`]
//! only wait for its outcome, so a cancelled caller never cancels a round
//! other callers share.

use crate::lookup::{LookupError, LookupQuery, LookupSender, LookupTarget};
use crate::reconcile::{reconcile, Decision};
use crate::reply::ReplySink;
use crate::stats::{DiscoveryStats, DiscoveryStatsSnapshot};
use crate::types::DiscoveredLocator;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// Retry and scoping parameters of discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// How long one attempt waits for a reply.
    pub timeout: Duration,

    /// Attempts per round before giving up.
    pub max_attempts: u32,

    /// Cooldown after an exhausted round.
    pub retry_delay: Duration,

    /// Only accept locators of this instance (identity category).
    pub instance_name: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(300),
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            instance_name: None,
        }
    }
}

/// Resolution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Arc<DiscoveredLocator>),
    CoolingDown { until: Instant },
    Retryable,
}

/// Which instance name replies must carry.
///
/// `Unlocked` moves to `Locked` on the first accepted reply and never back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceScope {
    Configured(String),
    Unlocked,
    Locked(String),
}

impl InstanceScope {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Configured(name) | Self::Locked(name) => Some(name),
            Self::Unlocked => None,
        }
    }

    fn lock(&mut self, name: &str) {
        if *self == Self::Unlocked {
            *self = Self::Locked(name.to_string());
        }
    }
}

type Outcome = Option<Arc<DiscoveredLocator>>;

/// A finished lookup send and its target.
type SendResult = (LookupTarget, Result<(), LookupError>);

/// One discovery round.
///
/// Created per round and dropped when it completes.
struct DiscoveryAttempt {
    /// Signalled once when a reply is accepted.
    found: Notify,
    fulfilled: AtomicBool,
    /// `None` while the round is running.
    outcome: watch::Sender<Option<Outcome>>,
}

impl DiscoveryAttempt {
    fn new() -> Self {
        Self {
            found: Notify::new(),
            fulfilled: AtomicBool::new(false),
            outcome: watch::Sender::new(None),
        }
    }

    fn fulfill(&self) {
        if !self.fulfilled.swap(true, Ordering::AcqRel) {
            self.found.notify_one();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Found,
    Exhausted,
    SendFailure,
    Shutdown,
}

struct State {
    resolution: Resolution,
    scope: InstanceScope,
    attempt: Option<Arc<DiscoveryAttempt>>,
    warned_identity_mismatch: bool,
}

struct Inner {
    settings: DiscoverySettings,
    targets: Arc<[LookupTarget]>,
    sender: Arc<dyn LookupSender>,
    state: Mutex<State>,
    stats: DiscoveryStats,
    survey_tx: broadcast::Sender<DiscoveredLocator>,
    shutdown_tx: watch::Sender<bool>,
}

/// Discovery coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    inner: Arc<Inner>,
}

impl DiscoveryCoordinator {
    /// Create a coordinator sending through `sender` to `targets`.
    ///
    /// Targets sharing a destination and interface are queried once.
    pub fn new(
        settings: DiscoverySettings,
        targets: Vec<LookupTarget>,
        sender: Arc<dyn LookupSender>,
    ) -> Self {
        let mut seen = HashSet::new();
        let targets: Vec<LookupTarget> = targets
            .into_iter()
            .filter(|t| seen.insert(t.key()))
            .collect();

        let scope = match settings.instance_name.as_deref() {
            Some(name) if !name.is_empty() => InstanceScope::Configured(name.to_string()),
            _ => InstanceScope::Unlocked,
        };

        let (survey_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                settings,
                targets: targets.into(),
                sender,
                state: Mutex::new(State {
                    resolution: Resolution::Retryable,
                    scope,
                    attempt: None,
                    warned_identity_mismatch: false,
                }),
                stats: DiscoveryStats::new(),
                survey_tx,
                shutdown_tx: watch::Sender::new(false),
            }),
        }
    }

    /// Get the locator, discovering it if needed.
    ///
    /// Returns `None` while cooling down after an exhausted round, when the
    /// round finds nothing, or after shutdown.
    pub async fn resolve(&self) -> Option<Arc<DiscoveredLocator>> {
        let mut outcome = {
            let mut state = self.inner.state.lock();

            if self.inner.is_shutdown() {
                return None;
            }

            if let Resolution::Resolved(locator) = &state.resolution {
                return Some(Arc::clone(locator));
            }

            if let Resolution::CoolingDown { until } = state.resolution {
                if Instant::now() < until {
                    tracing::trace!("Locator lookup cooling down");
                    return None;
                }
                state.resolution = Resolution::Retryable;
            }

            let attempt = match state.attempt.clone() {
                Some(attempt) => attempt,
                None => {
                    let attempt = Arc::new(DiscoveryAttempt::new());
                    state.attempt = Some(Arc::clone(&attempt));
                    tokio::spawn(run_round(Arc::clone(&self.inner), Arc::clone(&attempt)));
                    attempt
                }
            };

            attempt.outcome.subscribe()
        };

        let resolved = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().flatten(),
            Err(_) => None,
        };
        resolved
    }

    /// Reconcile a reply against the known locator.
    pub fn on_reply_received(&self, candidate: DiscoveredLocator) {
        self.inner.on_reply_received(candidate);
    }

    /// Drop the cached locator if it still equals `stale`.
    ///
    /// Returns whether the cache was cleared. A handle that was already
    /// replaced (by a merge or a rediscovery) leaves the cache alone.
    pub fn invalidate(&self, stale: &DiscoveredLocator) -> bool {
        let mut state = self.inner.state.lock();

        let current = matches!(&state.resolution, Resolution::Resolved(locator) if **locator == *stale);
        if current {
            state.resolution = Resolution::Retryable;
            DiscoveryStats::incr(&self.inner.stats.invalidations);
            tracing::debug!("Invalidated locator {}", stale);
        }
        current
    }

    /// The cached locator, without discovering.
    pub fn cached(&self) -> Option<Arc<DiscoveredLocator>> {
        match &self.inner.state.lock().resolution {
            Resolution::Resolved(locator) => Some(Arc::clone(locator)),
            _ => None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.inner.state.lock().resolution.clone()
    }

    pub fn instance_scope(&self) -> InstanceScope {
        self.inner.state.lock().scope.clone()
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.inner.settings
    }

    pub fn targets(&self) -> &[LookupTarget] {
        &self.inner.targets
    }

    pub fn stats(&self) -> DiscoveryStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Stop discovery: in-flight rounds end with `None`, later resolves
    /// return `None`.
    pub fn shutdown(&self) {
        if !self.inner.shutdown_tx.send_replace(true) {
            tracing::debug!("Discovery shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Receiver that turns true on [`shutdown`](Self::shutdown).
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Enumerate every locator deployment answering within `wait`.
    ///
    /// Sends one lookup round outside the single-flight attempt and the
    /// cooldown. Replies are grouped by instance name; replicas of the same
    /// locator are merged. Results are ordered by instance name.
    pub async fn survey(&self, instance_name: Option<&str>, wait: Duration) -> Vec<DiscoveredLocator> {
        let mut replies = self.inner.survey_tx.subscribe();
        let query = LookupQuery {
            instance_name: instance_name.unwrap_or_default().to_string(),
        };

        let mut sends = self.inner.spawn_sends(&query);
        while let Some(joined) = sends.join_next().await {
            self.inner.record_send(joined);
        }

        let deadline = Instant::now() + wait;
        let mut by_instance: BTreeMap<String, Vec<DiscoveredLocator>> = BTreeMap::new();

        loop {
            let candidate = match tokio::time::timeout_at(deadline, replies.recv()).await {
                Err(_) => break,
                Ok(Ok(candidate)) => candidate,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!("Survey skipped {} replies", skipped);
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
            };

            if let Some(name) = instance_name.filter(|n| !n.is_empty()) {
                if candidate.instance_name() != name {
                    continue;
                }
            }

            let group = by_instance
                .entry(candidate.instance_name().to_string())
                .or_default();
            merge_into(group, candidate);
        }

        by_instance.into_values().flatten().collect()
    }
}

fn merge_into(group: &mut Vec<DiscoveredLocator>, candidate: DiscoveredLocator) {
    let existing = group
        .iter_mut()
        .find(|known| known.same_object(&candidate) && known.protocol == candidate.protocol);

    match existing {
        Some(known) => {
            if let Some(merged) = known.merged_with(&candidate) {
                *known = merged;
            }
        }
        None => group.push(candidate),
    }
}

impl ReplySink for DiscoveryCoordinator {
    fn on_reply_received(&self, candidate: DiscoveredLocator) {
        self.inner.on_reply_received(candidate);
    }
}

impl Inner {
    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn query(&self) -> LookupQuery {
        let state = self.state.lock();
        LookupQuery {
            instance_name: state.scope.name().unwrap_or_default().to_string(),
        }
    }

    fn on_reply_received(&self, candidate: DiscoveredLocator) {
        if self.survey_tx.receiver_count() > 0 {
            let _ = self.survey_tx.send(candidate.clone());
        }

        let mut state = self.state.lock();

        let known = match &state.resolution {
            Resolution::Resolved(locator) => Some(Arc::clone(locator)),
            _ => None,
        };
        let decision = reconcile(known.as_deref(), state.scope.name(), &candidate);
        let accepted = decision.is_accepted();

        match decision {
            Decision::AcceptFirst => {
                let locator = Arc::new(candidate);
                state.scope.lock(locator.instance_name());
                tracing::debug!("Locator found: {}", locator);
                state.resolution = Resolution::Resolved(locator);
                DiscoveryStats::incr(&self.stats.replies_accepted);
            }
            Decision::Merge(merged) => {
                tracing::debug!("Locator replica added: {}", merged);
                state.resolution = Resolution::Resolved(Arc::new(merged));
                DiscoveryStats::incr(&self.stats.replies_merged);
            }
            Decision::AlreadyKnown => {
                tracing::trace!("Duplicate locator reply: {}", candidate);
            }
            Decision::RejectInstanceMismatch => {
                DiscoveryStats::incr(&self.stats.replies_rejected);
                tracing::debug!(
                    "Ignoring locator of instance `{}` (expecting `{}`)",
                    candidate.instance_name(),
                    state.scope.name().unwrap_or_default()
                );
            }
            Decision::RejectIdentityMismatch => {
                DiscoveryStats::incr(&self.stats.replies_rejected);
                let known = known.as_deref().map(|k| k.identity.to_string());
                if state.warned_identity_mismatch {
                    tracing::debug!(
                        "Ignoring locator {} (known: {:?})",
                        candidate.identity,
                        known
                    );
                } else {
                    state.warned_identity_mismatch = true;
                    tracing::warn!(
                        "Several locator deployments answer the same lookup group: ignoring {} (known: {}). Set an instance name to select one.",
                        candidate.identity,
                        known.unwrap_or_default()
                    );
                }
            }
            Decision::RejectProtocolMismatch => {
                DiscoveryStats::incr(&self.stats.replies_rejected);
                tracing::warn!(
                    "Ignoring locator {} with protocol {} (known locator uses {})",
                    candidate.identity,
                    candidate.protocol,
                    known.as_deref().map(|k| k.protocol.to_string()).unwrap_or_default()
                );
            }
        }

        if accepted {
            if let Some(attempt) = &state.attempt {
                attempt.fulfill();
            }
        }
    }

    /// Hand `query` to the sender for every target at once.
    fn spawn_sends(&self, query: &LookupQuery) -> JoinSet<SendResult> {
        let mut sends = JoinSet::new();
        for target in self.targets.iter() {
            let sender = Arc::clone(&self.sender);
            let target = target.clone();
            let query = query.clone();
            sends.spawn(async move {
                let result = sender.send(&target, &query).await;
                (target, result)
            });
        }
        sends
    }

    /// Count one finished send. Returns true if it faulted.
    fn record_send(&self, joined: Result<SendResult, JoinError>) -> bool {
        DiscoveryStats::incr(&self.stats.lookups_sent);
        let failed = match joined {
            Ok((_, Ok(()))) => false,
            Ok((target, Err(e))) => {
                tracing::debug!("Lookup to {} failed: {}", target.destination, e);
                true
            }
            Err(e) => {
                tracing::debug!("Lookup send task failed: {}", e);
                true
            }
        };
        if failed {
            DiscoveryStats::incr(&self.stats.send_failures);
        }
        failed
    }

    /// Send lookups and wait for an accepted reply, attempt by attempt.
    async fn drive(&self, attempt: &DiscoveryAttempt) -> RoundEnd {
        DiscoveryStats::incr(&self.stats.rounds);

        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return RoundEnd::Shutdown;
        }

        if self.targets.is_empty() {
            tracing::warn!("No lookup targets configured");
            return RoundEnd::SendFailure;
        }

        let query = self.query();
        let max_attempts = self.settings.max_attempts.max(1);

        for n in 1..=max_attempts {
            tracing::debug!(
                "Locator lookup attempt {}/{} ({} targets)",
                n,
                max_attempts,
                self.targets.len()
            );

            let mut sends = self.spawn_sends(&query);

            let total = self.targets.len();
            let mut failures = 0;
            let mut sends_done = false;
            let deadline = tokio::time::sleep(self.settings.timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    biased;

                    _ = attempt.found.notified() => return RoundEnd::Found,

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return RoundEnd::Shutdown;
                        }
                    }

                    joined = sends.join_next(), if !sends_done => {
                        let Some(joined) = joined else {
                            sends_done = true;
                            continue;
                        };
                        if self.record_send(joined) {
                            failures += 1;
                            if failures == total {
                                return RoundEnd::SendFailure;
                            }
                        }
                    }

                    _ = &mut deadline => break,
                }
            }
        }

        RoundEnd::Exhausted
    }

    /// Settle the state after a round and return its outcome.
    fn complete(&self, attempt: &Arc<DiscoveryAttempt>, end: RoundEnd) -> Outcome {
        let mut state = self.state.lock();

        if state
            .attempt
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, attempt))
        {
            state.attempt = None;
        }

        if end == RoundEnd::Shutdown {
            return None;
        }

        if let Resolution::Resolved(locator) = &state.resolution {
            return Some(Arc::clone(locator));
        }

        match end {
            RoundEnd::Exhausted => {
                let until = Instant::now() + self.settings.retry_delay;
                state.resolution = Resolution::CoolingDown { until };
                tracing::info!(
                    "No locator found after {} attempts, next lookup in {:?}",
                    self.settings.max_attempts,
                    self.settings.retry_delay
                );
            }
            RoundEnd::SendFailure => {
                tracing::warn!("Failed to send locator lookup to any target");
            }
            RoundEnd::Found | RoundEnd::Shutdown => {}
        }

        None
    }
}

async fn run_round(inner: Arc<Inner>, attempt: Arc<DiscoveryAttempt>) {
    let end = inner.drive(&attempt).await;
    let outcome = inner.complete(&attempt, end);
    attempt.outcome.send_replace(Some(outcome));
}
