use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_exam_type, optional_f64, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_type = match optional_exam_type(req) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing examType", None),
        Err(e) => return e,
    };
    let marks_obtained = match required_f64(req, "marksObtained") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_full: Option<f64> = match conn
        .query_row(
            "SELECT full_marks FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject_full) = subject_full else {
        return err(&req.id, "not_found", "subject not found", None);
    };
    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let max_marks = match optional_f64(req, "maxMarks") {
        Ok(v) => v.unwrap_or(subject_full),
        Err(e) => return e,
    };
    if max_marks <= 0.0 {
        return err(&req.id, "bad_params", "maxMarks must be > 0", None);
    }
    if !(0.0..=max_marks).contains(&marks_obtained) {
        return err(
            &req.id,
            "bad_params",
            format!("marksObtained must be between 0 and {}", max_marks),
            Some(json!({ "marksObtained": marks_obtained, "maxMarks": max_marks })),
        );
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mark_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_type, marks_obtained, max_marks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_type) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           max_marks = excluded.max_marks,
           updated_at = excluded.updated_at",
        (
            &mark_id,
            &student_id,
            &subject_id,
            exam_type.as_str(),
            marks_obtained,
            max_marks,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    let stored_id: String = match conn.query_row(
        "SELECT id FROM marks WHERE student_id = ? AND subject_id = ? AND exam_type = ?",
        (&student_id, &subject_id, exam_type.as_str()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "markId": stored_id }))
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_type = match optional_exam_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT m.id, m.subject_id, sub.name, sub.code, m.exam_type, m.marks_obtained, m.max_marks
         FROM marks m
         JOIN subjects sub ON sub.id = m.subject_id
         WHERE m.student_id = ?",
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(student_id)];
    if let Some(e) = exam_type {
        sql.push_str(" AND m.exam_type = ?");
        bind_values.push(Value::Text(e.as_str().to_string()));
    }
    sql.push_str(" ORDER BY m.exam_type, sub.code");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let subject_name: String = row.get(2)?;
            let subject_code: String = row.get(3)?;
            let exam_type: String = row.get(4)?;
            let marks_obtained: f64 = row.get(5)?;
            let max_marks: f64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "subjectCode": subject_code,
                "examType": exam_type,
                "marksObtained": marks_obtained,
                "maxMarks": max_marks,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        _ => None,
    }
}
