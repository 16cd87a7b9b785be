use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::queue::{ApprovalQueueItem, StatusFilter};
use crate::models::transition::ItemId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub total: usize,
}

/// Last server snapshot of the approval queue plus the operator's selection.
///
/// Items are only ever replaced wholesale by a fetch; local actions touch the
/// selection set and nothing else, so server truth wins on the next refresh.
#[derive(Debug, Default)]
pub struct ApprovalQueueStore {
    items: Vec<ApprovalQueueItem>,
    selected: BTreeSet<ItemId>,
    applied_seq: u64,
    last_refreshed: Option<DateTime<Utc>>,
}

impl ApprovalQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the result of fetch number `seq`. Results older than the last
    /// applied one are discarded and `false` is returned.
    pub fn replace(&mut self, seq: u64, items: Vec<ApprovalQueueItem>) -> bool {
        if seq <= self.applied_seq {
            tracing::debug!(seq, applied = self.applied_seq, "discarding stale queue snapshot");
            return false;
        }

        // one item per id; the server should never send duplicates, keep the first
        let mut seen = BTreeSet::new();
        let items: Vec<ApprovalQueueItem> = items
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        self.selected.retain(|id| {
            items
                .iter()
                .any(|item| &item.id == id && item.status.is_awaiting_decision())
        });
        self.items = items;
        self.applied_seq = seq;
        self.last_refreshed = Some(Utc::now());
        true
    }

    pub fn items(&self) -> &[ApprovalQueueItem] {
        &self.items
    }

    pub fn get(&self, id: &ItemId) -> Option<&ApprovalQueueItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    /// Select an item still awaiting a decision. Returns whether it is now selected.
    pub fn select(&mut self, id: &ItemId) -> bool {
        match self.get(id) {
            Some(item) if item.status.is_awaiting_decision() => {
                self.selected.insert(id.clone());
                true
            }
            _ => false,
        }
    }

    pub fn deselect(&mut self, id: &ItemId) -> bool {
        self.selected.remove(id)
    }

    pub fn toggle(&mut self, id: &ItemId) -> bool {
        if self.selected.contains(id) {
            self.selected.remove(id);
            false
        } else {
            self.select(id)
        }
    }

    pub fn select_all_pending(&mut self) -> usize {
        for item in &self.items {
            if item.status.is_awaiting_decision() {
                self.selected.insert(item.id.clone());
            }
        }
        self.selected.len()
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &ItemId) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> Vec<ItemId> {
        self.selected.iter().cloned().collect()
    }

    /// Items matching a free-text query and a status category, in server order.
    pub fn filtered(&self, query: &str, filter: StatusFilter) -> Vec<&ApprovalQueueItem> {
        self.items
            .iter()
            .filter(|item| filter.matches(&item.status) && item.matches_query(query))
            .collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.items.len(),
            ..QueueCounts::default()
        };
        for item in &self.items {
            if StatusFilter::Pending.matches(&item.status) {
                counts.pending += 1;
            } else if StatusFilter::Approved.matches(&item.status) {
                counts.approved += 1;
            } else if StatusFilter::Rejected.matches(&item.status) {
                counts.rejected += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(values: serde_json::Value) -> Vec<ApprovalQueueItem> {
        let list = values.as_array().cloned().unwrap_or_default();
        ApprovalQueueItem::from_list(list)
    }

    fn sample() -> Vec<ApprovalQueueItem> {
        items(json!([
            { "id": 1, "entity_name": "Launch plan", "status": "pending" },
            { "id": 2, "entity_name": "Budget", "status": "approved" },
            { "id": 3, "entity_name": "Hiring", "status": "rejected" },
            { "instanceId": "wf-4", "entity_name": "Launch retro", "status": "escalated" }
        ]))
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut store = ApprovalQueueStore::new();
        assert!(store.replace(1, sample()));
        assert_eq!(store.items().len(), 4);
        assert!(store.replace(2, items(json!([{ "id": 9 }]))));
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].id, ItemId::from(9));
        assert!(store.last_refreshed().is_some());
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let mut store = ApprovalQueueStore::new();
        assert!(store.replace(5, sample()));
        assert!(!store.replace(3, items(json!([]))));
        assert_eq!(store.items().len(), 4);
        assert_eq!(store.applied_seq(), 5);
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let mut store = ApprovalQueueStore::new();
        store.replace(1, items(json!([{ "id": 1, "entity_name": "a" }, { "id": "1", "entity_name": "b" }])));
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].entity_name, "a");
    }

    #[test]
    fn test_selection_rules() {
        let mut store = ApprovalQueueStore::new();
        store.replace(1, sample());
        assert!(store.select(&ItemId::from(1)));
        assert!(!store.select(&ItemId::from(2)), "approved items are not selectable");
        assert!(!store.select(&ItemId::from(99)));
        assert!(store.toggle(&ItemId::from("wf-4")));
        assert_eq!(store.selected().len(), 2);
        assert!(!store.toggle(&ItemId::from("wf-4")));
        assert_eq!(store.select_all_pending(), 2);
        store.clear_selection();
        assert!(store.selected().is_empty());
    }

    #[test]
    fn test_refresh_prunes_selection() {
        let mut store = ApprovalQueueStore::new();
        store.replace(1, sample());
        store.select_all_pending();
        store.replace(2, items(json!([{ "id": 1, "status": "approved" }, { "instanceId": "wf-4" }])));
        assert_eq!(store.selected(), vec![ItemId::from("wf-4")]);
    }

    #[test]
    fn test_filtered_and_counts() {
        let mut store = ApprovalQueueStore::new();
        store.replace(1, sample());

        let launch: Vec<_> = store
            .filtered("launch", StatusFilter::Pending)
            .iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(launch, vec!["1", "wf-4"]);
        assert_eq!(store.filtered("", StatusFilter::All).len(), 4);
        assert_eq!(store.filtered("budget", StatusFilter::Rejected).len(), 0);

        let counts = store.counts();
        assert_eq!(counts, QueueCounts { pending: 2, approved: 1, rejected: 1, total: 4 });
    }
}
