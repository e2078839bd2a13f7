use crate::calc::{self, CalcContext};
use crate::db;
use crate::grading::{self, GradeEngine};
use crate::ipc::error::{err, grade_err, ok, ok_serialized};
use crate::ipc::helpers::{db_conn, exam_type_param, f64_list, optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const SCHEME_KEY_PREFIX: &str = "grading_scheme.";

fn scheme_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    optional_str(req, "scheme").map(|s| s.map(|v| v.to_ascii_lowercase()))
}

/// Resets the engine to the built-in tables plus the overrides stored in
/// this workspace. Stored tables that no longer validate are skipped.
pub fn restore_stored_schemes(conn: &Connection, engine: &GradeEngine) -> usize {
    let keys = match db::settings_keys_with_prefix(conn, SCHEME_KEY_PREFIX) {
        Ok(k) => k,
        Err(e) => {
            tracing::warn!(error = %e, "could not list stored grading schemes");
            Vec::new()
        }
    };

    let mut overrides = Vec::new();
    for key in keys {
        let Some(name) = key.strip_prefix(SCHEME_KEY_PREFIX) else {
            continue;
        };
        let bands = match db::settings_get_json(conn, &key) {
            Ok(Some(raw)) => grading::parse_bands(&raw),
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not read stored grading scheme");
                continue;
            }
        };
        match bands {
            Ok(b) => overrides.push((name.to_string(), b)),
            Err(e) => tracing::warn!(scheme = name, error = %e, "skipping stored grading scheme"),
        }
    }

    let offered = overrides.len();
    let rejected = engine.reload(overrides);
    for (name, e) in &rejected {
        tracing::warn!(scheme = %name, error = %e, "skipping stored grading scheme");
    }
    offered - rejected.len()
}

fn handle_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let marks = match required_f64(req, "marks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scheme = match scheme_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.engine.calculate_grade(marks, scheme.as_deref()) {
        Ok(g) => ok_serialized(&req.id, &g),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_gpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    let marks = match f64_list(req, "marks") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing marks", None),
        Err(e) => return e,
    };
    let scheme = match scheme_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.engine.calculate_gpa(&marks, scheme.as_deref()) {
        Ok(gpa) => ok(&req.id, json!({ "gpa": gpa })),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_cgpa(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let gpas = match f64_list(req, "gpas") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing gpas", None),
        Err(e) => return e,
    };
    let credits = match f64_list(req, "creditHours") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cgpa = grading::calculate_cgpa(&gpas, credits.as_deref());
    ok(&req.id, json!({ "cgpa": cgpa }))
}

fn handle_division(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let percentage = match required_f64(req, "percentage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let division = grading::class_division(percentage);
    ok(&req.id, json!({ "division": division.as_str() }))
}

fn handle_scheme_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scheme = match scheme_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let found = state.engine.get_grading_scheme(scheme.as_deref());
    ok(
        &req.id,
        json!({
            "scheme": found,
            "defaultScheme": state.engine.default_scheme(),
        }),
    )
}

fn handle_scheme_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scheme = match required_str(req, "scheme") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    let Some(raw_bands) = req.params.get("bands") else {
        return err(&req.id, "bad_params", "missing bands", None);
    };
    let bands = match grading::parse_bands(raw_bands) {
        Ok(b) => b,
        Err(e) => return grade_err(&req.id, &e),
    };

    let stored = bands.clone();
    let updated = match state.engine.update_grading_scheme(&scheme, bands) {
        Ok(v) => v,
        Err(e) => return grade_err(&req.id, &e),
    };

    let mut persisted = false;
    if let Some(conn) = state.db.as_ref() {
        let key = format!("{}{}", SCHEME_KEY_PREFIX, scheme);
        match serde_json::to_value(&stored)
            .map_err(anyhow::Error::from)
            .and_then(|v| db::settings_set_json(conn, &key, &v))
        {
            Ok(()) => persisted = true,
            Err(e) => tracing::warn!(scheme = %scheme, error = %e, "grading scheme not persisted"),
        }
    }

    ok(
        &req.id,
        json!({ "updated": updated, "scheme": scheme, "persisted": persisted }),
    )
}

fn handle_student_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_type = match exam_type_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext {
        conn,
        engine: &state.engine,
    };
    match calc::calculate_student_record(&ctx, &student_id, exam_type) {
        Ok(record) => ok_serialized(&req.id, &record),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };
    let mut student_ids = Vec::with_capacity(raw.len());
    for v in raw {
        let Some(id) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "studentIds must contain only strings",
                None,
            );
        };
        student_ids.push(id.trim().to_string());
    }
    let exam_type = match exam_type_param(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext {
        conn,
        engine: &state.engine,
    };
    let results = calc::bulk_calculate_grades(&ctx, &student_ids, exam_type);
    let succeeded = results.iter().filter(|r| r.success).count();
    tracing::info!(requested = student_ids.len(), succeeded, "bulk grades computed");
    ok(&req.id, json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.calculate" => Some(handle_calculate(state, req)),
        "grades.gpa" => Some(handle_gpa(state, req)),
        "grades.cgpa" => Some(handle_cgpa(state, req)),
        "grades.division" => Some(handle_division(state, req)),
        "grades.scheme.get" => Some(handle_scheme_get(state, req)),
        "grades.scheme.update" => Some(handle_scheme_update(state, req)),
        "grades.studentRecord" => Some(handle_student_record(state, req)),
        "grades.bulk" => Some(handle_bulk(state, req)),
        _ => None,
    }
}
