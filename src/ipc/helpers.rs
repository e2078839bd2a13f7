use crate::db::ExamType;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Absent, null and blank strings all read as `None`.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", key),
                None,
            )),
        },
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing numeric {}", key), None))
}

/// Absent and null read as `None`; anything else must be a number.
pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                None,
            )
        }),
    }
}

pub fn f64_list(req: &Request, key: &str) -> Result<Option<Vec<f64>>, serde_json::Value> {
    let Some(raw) = req.params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", format!("{} must be an array", key), None));
    };
    items
        .iter()
        .map(|v| v.as_f64())
        .collect::<Option<Vec<f64>>>()
        .map(Some)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must contain only numbers", key),
                None,
            )
        })
}

/// Reads `params.examType`, falling back to `FINAL`.
pub fn exam_type_param(req: &Request) -> Result<ExamType, serde_json::Value> {
    Ok(optional_exam_type(req)?.unwrap_or_default())
}

pub fn optional_exam_type(req: &Request) -> Result<Option<ExamType>, serde_json::Value> {
    let Some(raw) = optional_str(req, "examType")? else {
        return Ok(None);
    };
    ExamType::parse(&raw).map(Some).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("unknown examType: {}", raw),
            None,
        )
    })
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}
