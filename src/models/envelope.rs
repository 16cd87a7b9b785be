//! The `{ success, data, message, error }` wrapper the backend puts around
//! most response bodies. Some endpoints skip it and return the record or a
//! bare array; both shapes are accepted.

use serde_json::Value;

use crate::errors::{Result, WorkflowError};

/// Human-readable message from an envelope: `error` (string or `{message}`),
/// then `message`.
pub fn envelope_message(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Object(o)) => {
            if let Some(Value::String(s)) = o.get("message") {
                return Some(s.clone());
            }
        }
        _ => {}
    }
    match body.get("message") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// `true` unless the body is an object carrying `success: false`.
pub fn is_success(body: &Value) -> bool {
    !matches!(body.get("success"), Some(Value::Bool(false)))
}

/// Strip the envelope. `success: false` becomes [`WorkflowError::Rejected`],
/// `{ data: X }` yields `X`, anything else is returned as-is.
pub fn unwrap_data(body: Value) -> Result<Value> {
    if !is_success(&body) {
        return Err(WorkflowError::Rejected {
            message: envelope_message(&body).unwrap_or_else(|| "request was not accepted".into()),
        });
    }
    match body {
        Value::Object(mut obj) if obj.contains_key("data") => {
            Ok(obj.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Strip the envelope and require a list. `null` data is treated as empty.
pub fn unwrap_list(body: Value) -> Result<Vec<Value>> {
    match unwrap_data(body)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(WorkflowError::Decode(format!(
            "expected a list, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
