//! Approval queue orchestration.
//!
//! Owns the store and decides when it is refreshed: on demand, or when a
//! realtime event about approvals/workflows arrives and the throttle window
//! has passed. Decisions go through [`TransitionRequestService`] and only
//! touch the local selection; the queue itself changes on the next refresh.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::{ApprovalQueueStore, QueueCounts};
use crate::config::{Config, FailedDecisionPolicy};
use crate::errors::{Result, WorkflowError};
use crate::models::queue::{ApprovalQueueItem, StatusFilter};
use crate::models::transition::{ApprovalAction, DecisionOutcome, ItemId};
use crate::realtime::{RealtimeEvent, RealtimeSyncClient};
use crate::service::{PendingScope, TransitionRequestService, DEFAULT_QUEUE_STATUS};

/// Minimum spacing between realtime-triggered refreshes.
#[derive(Debug)]
pub struct RefreshThrottle {
    window: Duration,
    last_fetch: Option<Instant>,
}

impl RefreshThrottle {
    pub fn new(window: Duration) -> Self {
        Self { window, last_fetch: None }
    }

    /// Claim a refresh slot at `now`. Succeeds when more than `window` has
    /// passed since the last claimed or recorded fetch.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let open = match self.last_fetch {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.window,
        };
        if open {
            self.last_fetch = Some(now);
        }
        open
    }

    pub fn record(&mut self, now: Instant) {
        self.last_fetch = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAction {
    pub id: ItemId,
    pub reason: String,
}

/// Outcome of a bulk decision over the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BulkActionResult {
    /// Nothing was selected.
    Empty,
    AllSucceeded { succeeded: Vec<ItemId> },
    PartialFailure {
        succeeded: Vec<ItemId>,
        failed: Vec<FailedAction>,
    },
    AllFailed { failed: Vec<FailedAction> },
}

impl BulkActionResult {
    fn from_parts(succeeded: Vec<ItemId>, failed: Vec<FailedAction>) -> Self {
        match (succeeded.is_empty(), failed.is_empty()) {
            (true, true) => BulkActionResult::Empty,
            (false, true) => BulkActionResult::AllSucceeded { succeeded },
            (true, false) => BulkActionResult::AllFailed { failed },
            (false, false) => BulkActionResult::PartialFailure { succeeded, failed },
        }
    }

    pub fn succeeded(&self) -> &[ItemId] {
        match self {
            BulkActionResult::AllSucceeded { succeeded } | BulkActionResult::PartialFailure { succeeded, .. } => {
                succeeded
            }
            _ => &[],
        }
    }

    pub fn failed(&self) -> &[FailedAction] {
        match self {
            BulkActionResult::AllFailed { failed } | BulkActionResult::PartialFailure { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Load state of the single-item detail view, independent of the list.
#[derive(Debug, Clone, Default)]
pub struct DetailState {
    pub id: Option<ItemId>,
    pub loading: bool,
    pub error: Option<String>,
    pub data: Option<Value>,
}

pub struct ApprovalQueueController {
    service: TransitionRequestService,
    scope: PendingScope,
    status: String,
    store: Arc<RwLock<ApprovalQueueStore>>,
    throttle: Mutex<RefreshThrottle>,
    seq: AtomicU64,
    inflight: AtomicUsize,
    last_error: Mutex<Option<String>>,
    detail: RwLock<DetailState>,
    policy: FailedDecisionPolicy,
    cancel: CancellationToken,
}

impl ApprovalQueueController {
    pub fn new(service: TransitionRequestService, scope: PendingScope) -> Self {
        Self {
            service,
            scope,
            status: DEFAULT_QUEUE_STATUS.to_string(),
            store: Arc::new(RwLock::new(ApprovalQueueStore::new())),
            throttle: Mutex::new(RefreshThrottle::new(Duration::from_millis(2000))),
            seq: AtomicU64::new(0),
            inflight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            detail: RwLock::new(DetailState::default()),
            policy: FailedDecisionPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(service: TransitionRequestService, scope: PendingScope, cfg: &Config) -> Self {
        Self::new(service, scope)
            .with_throttle(cfg.refresh_throttle())
            .with_failure_policy(cfg.failed_decision_policy)
    }

    pub fn with_throttle(self, window: Duration) -> Self {
        *self.throttle.lock().unwrap_or_else(|e| e.into_inner()) = RefreshThrottle::new(window);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailedDecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Queue status passed to the pending query (default `PENDING`).
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn store(&self) -> Arc<RwLock<ApprovalQueueStore>> {
        self.store.clone()
    }

    // ── Refresh ───────────────────────────────────────────────

    pub async fn refresh(&self) -> Result<usize> {
        let token = self.cancel.child_token();
        self.refresh_with(&token).await
    }

    /// Fetch the queue and replace the store. A cancelled token, or a response
    /// overtaken by a newer refresh, leaves the store and `last_error`
    /// untouched and yields `Err(Cancelled)`.
    pub async fn refresh_with(&self, token: &CancellationToken) -> Result<usize> {
        if token.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(Instant::now());

        self.inflight.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            _ = token.cancelled() => Err(WorkflowError::Cancelled),
            r = self.service.pending(&self.scope, Some(&self.status)) => r,
        };
        self.inflight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(items) => {
                if token.is_cancelled() {
                    return Err(WorkflowError::Cancelled);
                }
                let count = items.len();
                if !self.store.write().await.replace(seq, items) {
                    // superseded by a newer refresh; its outcome owns last_error
                    return Err(WorkflowError::Cancelled);
                }
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                tracing::debug!(seq, count, "approval queue refreshed");
                Ok(count)
            }
            Err(WorkflowError::Cancelled) => {
                tracing::debug!(seq, "queue refresh cancelled");
                Err(WorkflowError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(seq, error = %e, "approval queue refresh failed");
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.inflight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// React to a push event. Returns `true` if it triggered a refresh.
    pub async fn handle_realtime_event(&self, event: &RealtimeEvent) -> bool {
        if !event.touches_queue() {
            return false;
        }
        let acquired = self
            .throttle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .try_acquire(Instant::now());
        if !acquired {
            tracing::debug!(kind = %event.kind, "queue refresh throttled");
            return false;
        }
        tracing::debug!(kind = %event.kind, "realtime event triggered queue refresh");
        // failures are already logged and recorded in last_error
        let _ = self.refresh().await;
        true
    }

    /// Refresh on every qualifying event from `client` until `shutdown()`.
    pub fn attach(self: &Arc<Self>, client: &RealtimeSyncClient) -> JoinHandle<()> {
        let mut events = client.subscribe();
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = events.recv() => match ev {
                        Some(ev) => {
                            this.handle_realtime_event(&ev).await;
                        }
                        None => break,
                    }
                }
            }
        })
    }

    /// Cancel in-flight and future work; late responses never reach the store.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ── Decisions ─────────────────────────────────────────────

    pub async fn approve(&self, id: &ItemId) -> Result<DecisionOutcome> {
        self.decide_one(id, ApprovalAction::Approve, None).await
    }

    pub async fn reject(&self, id: &ItemId, reason: &str) -> Result<DecisionOutcome> {
        self.decide_one(id, ApprovalAction::Reject, Some(reason)).await
    }

    pub async fn escalate(&self, id: &ItemId, reason: Option<&str>) -> Result<DecisionOutcome> {
        self.decide_one(id, ApprovalAction::Escalate, reason).await
    }

    async fn decide_one(&self, id: &ItemId, action: ApprovalAction, reason: Option<&str>) -> Result<DecisionOutcome> {
        if self.cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        match self.service.decide(id, action, reason).await {
            Ok(outcome) if outcome.success => {
                self.store.write().await.deselect(id);
                Ok(outcome)
            }
            Ok(outcome) => {
                self.apply_failure_policy(id).await;
                Err(WorkflowError::Rejected {
                    message: outcome
                        .message
                        .unwrap_or_else(|| format!("{} was not accepted", action)),
                })
            }
            Err(e) => {
                tracing::warn!(request_id = %id, action = %action, error = %e, "decision failed");
                self.apply_failure_policy(id).await;
                Err(e)
            }
        }
    }

    async fn apply_failure_policy(&self, id: &ItemId) {
        if self.policy == FailedDecisionPolicy::Deselect {
            self.store.write().await.deselect(id);
        }
    }

    /// Approve every selected item concurrently and report per-item results.
    pub async fn bulk_approve(&self) -> BulkActionResult {
        let ids = self.store.read().await.selected();
        if ids.is_empty() {
            return BulkActionResult::Empty;
        }

        let calls = ids.iter().map(|id| async move {
            let result = self.service.decide(id, ApprovalAction::Approve, None).await;
            (id.clone(), result)
        });
        let results = join_all(calls).await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(outcome) if outcome.success => succeeded.push(id),
                Ok(outcome) => failed.push(FailedAction {
                    id,
                    reason: outcome.message.unwrap_or_else(|| "rejected by server".to_string()),
                }),
                Err(e) => failed.push(FailedAction { id, reason: e.to_string() }),
            }
        }

        {
            let mut store = self.store.write().await;
            for id in &succeeded {
                store.deselect(id);
            }
            if self.policy == FailedDecisionPolicy::Deselect {
                for f in &failed {
                    store.deselect(&f.id);
                }
            }
        }

        if !failed.is_empty() {
            tracing::warn!(
                succeeded = succeeded.len(),
                failed = failed.len(),
                "bulk approve finished with failures"
            );
        } else {
            tracing::info!(succeeded = succeeded.len(), "bulk approve finished");
        }
        BulkActionResult::from_parts(succeeded, failed)
    }

    // ── Detail ────────────────────────────────────────────────

    pub async fn fetch_detail(&self, id: &ItemId) -> Result<Value> {
        let item_id = {
            let store = self.store.read().await;
            store
                .get(id)
                .map(|item| item.id.clone())
                .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?
        };

        *self.detail.write().await = DetailState {
            id: Some(item_id.clone()),
            loading: true,
            error: None,
            data: None,
        };

        let result = self.service.request_detail(&item_id).await;

        let mut detail = self.detail.write().await;
        // a newer detail request replaced this one
        if detail.id.as_ref() != Some(&item_id) {
            return result;
        }
        detail.loading = false;
        match &result {
            Ok(data) => detail.data = Some(data.clone()),
            Err(e) => detail.error = Some(e.to_string()),
        }
        result
    }

    pub async fn detail(&self) -> DetailState {
        self.detail.read().await.clone()
    }

    // ── Views ─────────────────────────────────────────────────

    pub async fn filtered(&self, query: &str, filter: StatusFilter) -> Vec<ApprovalQueueItem> {
        self.store
            .read()
            .await
            .filtered(query, filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> QueueCounts {
        self.store.read().await.counts()
    }

    pub async fn items(&self) -> Vec<ApprovalQueueItem> {
        self.store.read().await.items().to_vec()
    }

    pub async fn select(&self, id: &ItemId) -> bool {
        self.store.write().await.select(id)
    }

    pub async fn select_all_pending(&self) -> usize {
        self.store.write().await.select_all_pending()
    }

    pub async fn selected(&self) -> Vec<ItemId> {
        self.store.read().await.selected()
    }
}
