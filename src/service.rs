//! Transition-request protocol against the workflow REST API.
//!
//! Stateless: every call goes straight to the [`Transport`]. Caching of
//! history lives in [`crate::history`], queue state in [`crate::queue`].

use std::fmt::Display;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{Result, WorkflowError};
use crate::models::envelope::{unwrap_data, unwrap_list};
use crate::models::history::HistoryEvent;
use crate::models::queue::ApprovalQueueItem;
use crate::models::transition::{
    normalize_entity_type, ApprovalAction, DecisionBody, DecisionOutcome, EntityId, ItemId,
    TransitionInput, TransitionRequest,
};
use crate::transport::{segment, Transport};

pub const DEFAULT_QUEUE_STATUS: &str = "PENDING";

const REQUEST_PATH: &str = "/api/workflow/request";
const PENDING_PATH: &str = "/api/workflow/pending";
const DECIDE_PATH: &str = "/api/workflow/approve";
const HISTORY_PATH: &str = "/api/workflow/history";
const PROJECT_CLOSE_PATH: &str = "/api/workflow/project/close-request";

/// Who a pending-queue query is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingScope {
    Role(String),
    Manager(i64),
}

impl PendingScope {
    /// Integer-looking input is a manager id, anything else a role name.
    /// Blank input falls back to `default_role`.
    pub fn parse(raw: &str, default_role: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return PendingScope::Manager(id);
        }
        if trimmed.is_empty() {
            return PendingScope::Role(default_role.to_string());
        }
        PendingScope::Role(trimmed.to_string())
    }

    fn query(&self, status: &str) -> Vec<(&'static str, String)> {
        match self {
            PendingScope::Role(role) => vec![("role", role.clone()), ("status", status.to_string())],
            PendingScope::Manager(id) => vec![("managerId", id.to_string()), ("status", status.to_string())],
        }
    }
}

#[derive(Clone)]
pub struct TransitionRequestService {
    transport: Arc<dyn Transport>,
    default_role: String,
}

impl TransitionRequestService {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            default_role: "MANAGER".to_string(),
        }
    }

    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    /// `POST /api/workflow/request`
    pub async fn request_transition(&self, input: TransitionInput) -> Result<TransitionRequest> {
        if input.entity_type.trim().is_empty() {
            return Err(WorkflowError::InvalidArgument("entity type is required".into()));
        }
        if let EntityId::Text(s) = &input.entity_id {
            if s.trim().is_empty() {
                return Err(WorkflowError::InvalidArgument("entity id is required".into()));
            }
        }

        let draft = input.into_draft();
        tracing::info!(
            entity_type = %draft.entity_type,
            entity_id = %draft.entity_id,
            to_state = %draft.to_state,
            "requesting workflow transition"
        );

        let body = serde_json::to_value(&draft)?;
        let resp = self.transport.post(REQUEST_PATH, &body).await?;
        Ok(TransitionRequest::from_value(unwrap_data(resp)?))
    }

    /// `GET /api/workflow/pending?role=..&status=..`
    pub async fn pending_by_role(&self, role: &str, status: Option<&str>) -> Result<Vec<ApprovalQueueItem>> {
        let role = if role.trim().is_empty() { self.default_role.as_str() } else { role.trim() };
        self.pending(&PendingScope::Role(role.to_string()), status).await
    }

    /// `GET /api/workflow/pending?managerId=..&status=..`
    pub async fn pending_by_manager(&self, manager_id: i64, status: Option<&str>) -> Result<Vec<ApprovalQueueItem>> {
        self.pending(&PendingScope::Manager(manager_id), status).await
    }

    pub async fn pending(&self, scope: &PendingScope, status: Option<&str>) -> Result<Vec<ApprovalQueueItem>> {
        let status = status
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_QUEUE_STATUS);
        let query = scope.query(status);
        let resp = self.transport.get(PENDING_PATH, &query).await?;
        let items = ApprovalQueueItem::from_list(unwrap_list(resp)?);
        tracing::debug!(scope = ?scope, status, count = items.len(), "fetched pending queue");
        Ok(items)
    }

    /// Accepts either a role name or a manager id in one argument.
    #[deprecated(note = "use pending_by_role or pending_by_manager")]
    pub async fn get_pending_queue(
        &self,
        role_or_manager: impl Display,
        status: Option<&str>,
    ) -> Result<Vec<ApprovalQueueItem>> {
        let scope = PendingScope::parse(&role_or_manager.to_string(), &self.default_role);
        self.pending(&scope, status).await
    }

    /// `POST /api/workflow/approve`
    ///
    /// Returns the whole envelope. A 2xx with `success: false` is `Ok` with
    /// `outcome.success == false`; only transport and HTTP failures are `Err`.
    pub async fn decide(
        &self,
        request_id: &ItemId,
        action: ApprovalAction,
        reason: Option<&str>,
    ) -> Result<DecisionOutcome> {
        let body = DecisionBody {
            request_id: request_id.clone(),
            action,
            reason: reason.map(str::to_string).filter(|r| !r.trim().is_empty()),
        };
        let resp = self.transport.post(DECIDE_PATH, &serde_json::to_value(&body)?).await?;
        let outcome = DecisionOutcome::from_envelope(resp);

        if outcome.success {
            tracing::info!(request_id = %request_id, action = %action, "decision recorded");
        } else {
            tracing::warn!(
                request_id = %request_id,
                action = %action,
                message = outcome.message.as_deref().unwrap_or(""),
                "decision rejected by server"
            );
        }
        Ok(outcome)
    }

    /// Boolean `approved` flag form; `None` approves.
    #[deprecated(note = "use decide with an explicit ApprovalAction")]
    pub async fn decide_legacy(
        &self,
        request_id: &ItemId,
        approved: Option<bool>,
        reason: Option<&str>,
    ) -> Result<DecisionOutcome> {
        self.decide(request_id, ApprovalAction::from_legacy_flag(approved), reason)
            .await
    }

    /// `GET /api/workflow/history/{entityType}/{entityId}`, in server order.
    pub async fn get_history(&self, entity_type: &str, entity_id: &EntityId) -> Result<Vec<HistoryEvent>> {
        let path = format!(
            "{}/{}/{}",
            HISTORY_PATH,
            segment(&normalize_entity_type(entity_type)),
            segment(&entity_id.to_string())
        );
        let resp = self.transport.get(&path, &[]).await?;
        Ok(HistoryEvent::from_list(&unwrap_list(resp)?))
    }

    /// `GET /api/workflow/request/{id}`, extended record for one request.
    pub async fn request_detail(&self, request_id: &ItemId) -> Result<Value> {
        let path = format!("{}/{}", REQUEST_PATH, segment(request_id.as_str()));
        let resp = self.transport.get(&path, &[]).await?;
        match unwrap_data(resp)? {
            Value::Null => Err(WorkflowError::NotFound(request_id.to_string())),
            detail => Ok(detail),
        }
    }

    /// `POST /api/workflow/project/close-request`, payload passed through.
    pub async fn request_project_close(&self, payload: &Value) -> Result<Value> {
        self.transport.post(PROJECT_CLOSE_PATH, payload).await
    }
}
