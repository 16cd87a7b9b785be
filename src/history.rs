//! Per-entity audit timeline cache.
//!
//! Each key moves `Unfetched → Loading → (Loaded | Error)` and may re-enter
//! `Loading` on refresh. Concurrent fetches of the same key share one
//! request; every caller observes the same outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::errors::WorkflowError;
use crate::models::history::HistoryEvent;
use crate::models::transition::{normalize_entity_type, EntityId};
use crate::service::TransitionRequestService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Unfetched,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone)]
struct Entry {
    state: FetchState,
    items: Vec<HistoryEvent>,
    error: Option<String>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            state: FetchState::Unfetched,
            items: Vec::new(),
            error: None,
        }
    }
}

type FetchResult = Result<Arc<Vec<HistoryEvent>>, Arc<WorkflowError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Cache key, `"{ENTITY_TYPE}_{entityId}"`.
pub fn history_key(entity_type: &str, entity_id: &EntityId) -> String {
    format!("{}_{}", normalize_entity_type(entity_type), entity_id)
}

pub struct HistoryTimelineCache {
    service: TransitionRequestService,
    entries: Arc<DashMap<String, Entry>>,
    inflight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl HistoryTimelineCache {
    pub fn new(service: TransitionRequestService) -> Self {
        Self {
            service,
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch (or refetch) the timeline for one entity.
    pub async fn fetch(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Vec<HistoryEvent>, Arc<WorkflowError>> {
        let key = history_key(entity_type, entity_id);
        let fut = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some(existing) => {
                    tracing::debug!(key = %key, "joining in-flight history fetch");
                    existing.clone()
                }
                None => {
                    {
                        let mut entry = self.entries.entry(key.clone()).or_default();
                        entry.state = FetchState::Loading;
                        entry.error = None;
                    }
                    let fut = self.spawn_fetch(key.clone(), entity_type.to_string(), entity_id.clone());
                    inflight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        fut.await.map(|items| items.as_ref().clone())
    }

    fn spawn_fetch(&self, key: String, entity_type: String, entity_id: EntityId) -> SharedFetch {
        let service = self.service.clone();
        let entries = self.entries.clone();
        let inflight = self.inflight.clone();

        // runs to completion even if every caller goes away
        let handle = tokio::spawn(async move {
            let result = service.get_history(&entity_type, &entity_id).await;
            let outcome: FetchResult = {
                let mut entry = entries.entry(key.clone()).or_default();
                match result {
                    Ok(items) => {
                        entry.state = FetchState::Loaded;
                        entry.items = items.clone();
                        entry.error = None;
                        Ok(Arc::new(items))
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "history fetch failed");
                        entry.state = FetchState::Error;
                        entry.items.clear();
                        entry.error = Some(e.to_string());
                        Err(Arc::new(e))
                    }
                }
            };
            inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            outcome
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(Arc::new(WorkflowError::Internal(anyhow::anyhow!(
                        "history fetch task failed: {}",
                        e
                    ))))
                })
            })
            .boxed()
            .shared()
    }

    pub fn items(&self, key: &str) -> Vec<HistoryEvent> {
        self.entries
            .get(key)
            .map(|e| e.items.clone())
            .unwrap_or_default()
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.state(key) == FetchState::Loading
    }

    pub fn error(&self, key: &str) -> Option<String> {
        self.entries.get(key).and_then(|e| e.error.clone())
    }

    pub fn state(&self, key: &str) -> FetchState {
        self.entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(FetchState::Unfetched)
    }

    /// Forget a key. A fetch already in flight still completes and repopulates it.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}
