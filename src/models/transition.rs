use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::{first_present, first_string, scalar_to_string};

/// Target state used when a transition is requested without one.
pub const DEFAULT_TO_STATE: &str = "IN_REVIEW";

/// Justification sent when the caller gives none.
pub const DEFAULT_REASON: &str = "Task completed, ready for review";

/// Entity identifier as the backend knows it: numeric or opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n.as_i64().map(EntityId::Number),
            Value::String(s) if !s.trim().is_empty() => Some(EntityId::Text(s.trim().to_string())),
            _ => None,
        }
    }

    /// Mirrors what the backend treats as "no value": empty string or zero.
    pub fn is_blank(&self) -> bool {
        match self {
            EntityId::Number(n) => *n == 0,
            EntityId::Text(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Number(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId::Text(s)
    }
}

/// Identity of a transition request / queue item.
///
/// Equality, hashing and ordering use the textual form, so `12` from the
/// server and `"12"` typed by an operator address the same item. The numeric
/// hint only controls how the id is written back on the wire.
#[derive(Debug, Clone)]
pub struct ItemId {
    text: String,
    numeric: bool,
}

impl ItemId {
    /// Operator input: all-digit strings are sent back as numbers.
    pub fn infer(s: &str) -> Self {
        let text = s.trim().to_string();
        let numeric = text.parse::<i64>().is_ok();
        Self { text, numeric }
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => Some(Self { text: n.to_string(), numeric: n.is_i64() }),
            Value::String(s) if !s.trim().is_empty() => {
                Some(Self { text: s.trim().to_string(), numeric: false })
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for ItemId {}

impl Hash for ItemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.numeric, self.text.parse::<i64>()) {
            (true, Ok(n)) => serializer.serialize_i64(n),
            _ => serializer.serialize_str(&self.text),
        }
    }
}

impl From<i64> for ItemId {
    fn from(n: i64) -> Self {
        Self { text: n.to_string(), numeric: true }
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self { text: s.trim().to_string(), numeric: false }
    }
}

/// Identity spellings, in precedence order.
pub(crate) const ID_KEYS: &[&str] = &["id", "requestId", "_id", "instanceId"];

pub fn normalize_entity_type(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Caller-side description of a transition to request.
#[derive(Debug, Clone)]
pub struct TransitionInput {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub to_state: Option<String>,
    pub reason: Option<String>,
    pub project_id: Option<EntityId>,
}

impl TransitionInput {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            to_state: None,
            reason: None,
            project_id: None,
        }
    }

    pub fn to_state(mut self, state: impl Into<String>) -> Self {
        self.to_state = Some(state.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn project_id(mut self, project_id: impl Into<EntityId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Apply defaults and produce the wire body.
    pub fn into_draft(self) -> TransitionDraft {
        let to_state = self
            .to_state
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TO_STATE.to_string());
        let reason = self
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REASON.to_string());

        TransitionDraft {
            entity_type: normalize_entity_type(&self.entity_type),
            entity_id: self.entity_id,
            to_state,
            meta: TransitionMeta {
                reason,
                project_id: self.project_id.filter(|p| !p.is_blank()),
            },
        }
    }
}

/// Body of `POST /api/workflow/request`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDraft {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub to_state: String,
    pub meta: TransitionMeta,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionMeta {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
}

/// A transition request as stored by the server.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRequest {
    pub id: Option<ItemId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<EntityId>,
    pub to_state: Option<String>,
    pub status: Option<String>,
    pub reason: Option<String>,
    pub project_id: Option<EntityId>,
    pub created_at: Option<String>,
    pub raw: Value,
}

impl TransitionRequest {
    pub fn from_value(v: Value) -> Self {
        let meta = v.get("meta").cloned().unwrap_or(Value::Null);
        Self {
            id: first_present(&v, ID_KEYS).and_then(ItemId::from_value),
            entity_type: first_string(&v, &["entityType", "entity_type"]).map(|t| normalize_entity_type(&t)),
            entity_id: first_present(&v, &["entityId", "entity_id"]).and_then(EntityId::from_value),
            to_state: first_string(&v, &["toState", "to_state"]),
            status: first_string(&v, &["status", "state"]),
            reason: first_string(&v, &["reason"]).or_else(|| first_string(&meta, &["reason"])),
            project_id: first_present(&v, &["projectId", "project_id"])
                .or_else(|| first_present(&meta, &["projectId", "project_id"]))
                .and_then(EntityId::from_value),
            created_at: first_present(&v, &["created_at", "createdAt"]).and_then(scalar_to_string),
            raw: v,
        }
    }
}

/// Verb applied to a pending request. Terminal from the client's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approve,
    Reject,
    Escalate,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "APPROVE",
            ApprovalAction::Reject => "REJECT",
            ApprovalAction::Escalate => "ESCALATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" | "APPROVED" => Some(ApprovalAction::Approve),
            "REJECT" | "REJECTED" => Some(ApprovalAction::Reject),
            "ESCALATE" | "ESCALATED" => Some(ApprovalAction::Escalate),
            _ => None,
        }
    }

    /// Legacy `approved` flag; absent means approve.
    pub fn from_legacy_flag(approved: Option<bool>) -> Self {
        match approved {
            Some(false) => ApprovalAction::Reject,
            _ => ApprovalAction::Approve,
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/workflow/approve`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    pub request_id: ItemId,
    pub action: ApprovalAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The full decision envelope, kept intact so callers can tell a 2xx business
/// rejection (`success: false`) from a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub raw: Value,
}

impl DecisionOutcome {
    pub fn from_envelope(raw: Value) -> Self {
        Self {
            success: super::envelope::is_success(&raw),
            message: super::envelope::envelope_message(&raw),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draft_normalizes_and_defaults() {
        let draft = TransitionInput::new("task", 55).to_state("COMPLETED").into_draft();
        assert_eq!(
            serde_json::to_value(&draft).unwrap(),
            json!({
                "entityType": "TASK",
                "entityId": 55,
                "toState": "COMPLETED",
                "meta": { "reason": "Task completed, ready for review" }
            })
        );
    }

    #[test]
    fn test_draft_default_state_and_project() {
        let draft = TransitionInput::new(" project ", "p-9").project_id(7).into_draft();
        assert_eq!(draft.entity_type, "PROJECT");
        assert_eq!(draft.to_state, DEFAULT_TO_STATE);
        assert_eq!(draft.meta.project_id, Some(EntityId::Number(7)));
    }

    #[test]
    fn test_blank_project_id_is_omitted() {
        let draft = TransitionInput::new("task", 1).project_id("").into_draft();
        let body = serde_json::to_value(&draft).unwrap();
        assert!(body["meta"].get("projectId").is_none());

        let draft = TransitionInput::new("task", 1).project_id(0).into_draft();
        assert!(draft.meta.project_id.is_none());
    }

    #[test]
    fn test_item_id_text_equality_and_wire_form() {
        let from_server = ItemId::from_value(&json!(12)).unwrap();
        let typed = ItemId::infer("12");
        assert_eq!(from_server, typed);
        assert_eq!(serde_json::to_value(&from_server).unwrap(), json!(12));
        assert_eq!(serde_json::to_value(ItemId::from("abc-1")).unwrap(), json!("abc-1"));
    }

    #[test]
    fn test_decision_body_shape() {
        let body = DecisionBody {
            request_id: ItemId::from(9),
            action: ApprovalAction::Reject,
            reason: Some("Missing attachment".into()),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "requestId": 9, "action": "REJECT", "reason": "Missing attachment" })
        );
    }

    #[test]
    fn test_action_parse_and_legacy_flag() {
        assert_eq!(ApprovalAction::parse("approve"), Some(ApprovalAction::Approve));
        assert_eq!(ApprovalAction::parse("Escalated"), Some(ApprovalAction::Escalate));
        assert_eq!(ApprovalAction::parse("maybe"), None);
        assert_eq!(ApprovalAction::from_legacy_flag(None), ApprovalAction::Approve);
        assert_eq!(ApprovalAction::from_legacy_flag(Some(false)), ApprovalAction::Reject);
    }

    #[test]
    fn test_transition_request_from_mixed_shape() {
        let req = TransitionRequest::from_value(json!({
            "_id": "r-1",
            "entity_type": "task",
            "entityId": 55,
            "toState": "COMPLETED",
            "status": "pending",
            "meta": { "reason": "done", "projectId": 3 }
        }));
        assert_eq!(req.id, Some(ItemId::from("r-1")));
        assert_eq!(req.entity_type.as_deref(), Some("TASK"));
        assert_eq!(req.entity_id, Some(EntityId::Number(55)));
        assert_eq!(req.reason.as_deref(), Some("done"));
        assert_eq!(req.project_id, Some(EntityId::Number(3)));
    }
}
