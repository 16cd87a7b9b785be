use serde::Serialize;
use serde_json::Value;

use super::first_string;

/// One entry of an entity's audit timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEvent {
    pub at: Option<String>,
    pub actor: Option<String>,
    pub action: String,
    pub note: Option<String>,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
}

impl HistoryEvent {
    pub fn from_value(v: &Value) -> Option<Self> {
        if !v.is_object() {
            return None;
        }

        // actor may be a plain string or an embedded user record
        let actor = first_string(v, &["actor", "user", "performed_by", "performedBy", "by"]).or_else(|| {
            ["actor", "user", "performed_by", "performedBy"]
                .iter()
                .filter_map(|k| v.get(*k))
                .find(|a| a.is_object())
                .and_then(|a| first_string(a, &["name", "full_name", "email"]))
        });

        Some(Self {
            at: first_string(v, &["at", "timestamp", "created_at", "createdAt"]),
            actor,
            action: first_string(v, &["action", "event", "type", "status"])
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            note: first_string(v, &["note", "comment", "reason", "message"]),
            from_state: first_string(v, &["fromState", "from_state", "from"]),
            to_state: first_string(v, &["toState", "to_state", "to"]),
        })
    }

    /// Normalize a fetched timeline. Server order is kept as-is.
    pub fn from_list(values: &[Value]) -> Vec<Self> {
        values.iter().filter_map(Self::from_value).collect()
    }
}
