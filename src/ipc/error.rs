use serde_json::json;

use crate::error::GradeError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn grade_err(id: &str, e: &GradeError) -> serde_json::Value {
    if matches!(e, GradeError::Persistence(_)) {
        tracing::warn!(request_id = id, error = %e, "request failed in persistence layer");
    }
    err(id, e.code(), e.to_string(), e.details())
}

pub fn ok_serialized<T: serde::Serialize>(id: &str, value: &T) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(v) => ok(id, v),
        Err(e) => err(id, "serialize_failed", e.to_string(), None),
    }
}
