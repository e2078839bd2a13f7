use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_f64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, code, full_marks, pass_marks FROM subjects ORDER BY code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let full_marks: f64 = row.get(3)?;
            let pass_marks: f64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "fullMarks": full_marks,
                "passMarks": pass_marks,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(e) => return e,
    };
    let full_marks = match optional_f64(req, "fullMarks") {
        Ok(v) => v.unwrap_or(100.0),
        Err(e) => return e,
    };
    let pass_marks = match optional_f64(req, "passMarks") {
        Ok(v) => v.unwrap_or(32.0),
        Err(e) => return e,
    };
    if full_marks <= 0.0 || pass_marks < 0.0 || pass_marks > full_marks {
        return err(
            &req.id,
            "bad_params",
            "require 0 <= passMarks <= fullMarks and fullMarks > 0",
            None,
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code, full_marks, pass_marks) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &name, &code, full_marks, pass_marks),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id, "code": code }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        _ => None,
    }
}
