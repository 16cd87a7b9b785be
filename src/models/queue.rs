use serde::Serialize;
use serde_json::Value;

use super::transition::{normalize_entity_type, EntityId, ItemId, ID_KEYS};
use super::{first_present, first_string, scalar_to_string};

/// Decision state of a queue item, folded from the server's free-form status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
    Other(String),
}

impl QueueStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return QueueStatus::Pending;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "pending" | "in_review" | "awaiting_approval" | "requested" => QueueStatus::Pending,
            "approved" | "approve" | "completed" | "accepted" => QueueStatus::Approved,
            "rejected" | "reject" | "denied" | "declined" => QueueStatus::Rejected,
            "escalated" | "escalate" => QueueStatus::Escalated,
            _ => QueueStatus::Other(raw.trim().to_string()),
        }
    }

    /// Escalated items still wait for a decision.
    pub fn is_awaiting_decision(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Escalated)
    }
}

/// Status-category filter for queue views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    Pending,
    Approved,
    Rejected,
    All,
}

impl StatusFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(StatusFilter::Pending),
            "approved" => Some(StatusFilter::Approved),
            "rejected" => Some(StatusFilter::Rejected),
            "all" | "" => Some(StatusFilter::All),
            _ => None,
        }
    }

    pub fn matches(&self, status: &QueueStatus) -> bool {
        match self {
            StatusFilter::Pending => status.is_awaiting_decision(),
            StatusFilter::Approved => *status == QueueStatus::Approved,
            StatusFilter::Rejected => *status == QueueStatus::Rejected,
            StatusFilter::All => true,
        }
    }
}

/// Read projection of a transition request plus denormalized display fields.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalQueueItem {
    pub id: ItemId,
    pub entity_type: Option<String>,
    pub entity_id: Option<EntityId>,
    pub entity_name: String,
    pub requester_name: String,
    pub requester_email: String,
    pub to_state: Option<String>,
    pub priority: Option<String>,
    pub created_at: Option<String>,
    pub status: QueueStatus,
    /// Server record as received, for detail views.
    pub raw: Value,
}

impl ApprovalQueueItem {
    /// Returns `None` when no identity field is present.
    pub fn from_value(v: Value) -> Option<Self> {
        let id = first_present(&v, ID_KEYS).and_then(ItemId::from_value)?;

        let requester = v.get("requester").cloned().unwrap_or(Value::Null);
        let entity = v.get("entity").cloned().unwrap_or(Value::Null);

        let entity_name = first_string(&v, &["entity_name", "entityName", "title", "name"])
            .or_else(|| first_string(&entity, &["name", "title"]))
            .unwrap_or_default();
        let requester_name = first_string(&v, &["requester_name", "requesterName", "requested_by"])
            .or_else(|| first_string(&requester, &["name", "full_name"]))
            .unwrap_or_default();
        let requester_email = first_string(&v, &["requester_email", "requesterEmail"])
            .or_else(|| first_string(&requester, &["email"]))
            .unwrap_or_default();

        Some(Self {
            id,
            entity_type: first_string(&v, &["entityType", "entity_type"]).map(|t| normalize_entity_type(&t)),
            entity_id: first_present(&v, &["entityId", "entity_id"]).and_then(EntityId::from_value),
            entity_name,
            requester_name,
            requester_email,
            to_state: first_string(&v, &["toState", "to_state"]),
            priority: first_string(&v, &["priority"]),
            created_at: first_present(&v, &["created_at", "createdAt"]).and_then(scalar_to_string),
            status: QueueStatus::parse(first_string(&v, &["status", "state"]).as_deref()),
            raw: v,
        })
    }

    /// Normalize a fetched list, dropping records without identity.
    pub fn from_list(values: Vec<Value>) -> Vec<Self> {
        let total = values.len();
        let items: Vec<Self> = values.into_iter().filter_map(Self::from_value).collect();
        if items.len() < total {
            tracing::warn!(
                dropped = total - items.len(),
                "queue records without an id were dropped"
            );
        }
        items
    }

    /// Case-insensitive substring match over the display fields.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let haystacks = [
            Some(self.entity_name.as_str()),
            Some(self.requester_name.as_str()),
            Some(self.requester_email.as_str()),
            Some(self.id.as_str()),
            self.entity_type.as_deref(),
            self.to_state.as_deref(),
            self.priority.as_deref(),
        ];
        haystacks
            .iter()
            .flatten()
            .any(|h| h.to_lowercase().contains(&needle))
    }
}
