//! Canonical typed records for everything the workflow backend returns.
//!
//! The backend has drifted over time and the same field shows up under
//! several spellings (`id` / `requestId` / `_id` / `instanceId`,
//! `at` / `timestamp` / `created_at`, ...). All of that is resolved here, once,
//! when JSON enters the crate. Nothing downstream looks at raw field names.

pub mod envelope;
pub mod history;
pub mod queue;
pub mod transition;

use serde_json::Value;

/// First key in `keys` present on `obj` with a non-null, non-empty value.
pub(crate) fn first_present<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

/// Like [`first_present`] but renders scalars to a string.
pub(crate) fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    first_present(obj, keys).and_then(scalar_to_string)
}

pub(crate) fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_present_skips_null_and_blank() {
        let v = json!({ "id": null, "requestId": "  ", "_id": "abc", "instanceId": "zzz" });
        assert_eq!(first_present(&v, &["id", "requestId", "_id", "instanceId"]), Some(&json!("abc")));
    }

    #[test]
    fn test_first_string_renders_numbers() {
        let v = json!({ "id": 42 });
        assert_eq!(first_string(&v, &["id"]).as_deref(), Some("42"));
        assert_eq!(first_string(&v, &["missing"]), None);
    }
}
