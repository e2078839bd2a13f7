use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_name = match optional_str(req, "className") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match optional_str(req, "section") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT s.id, s.name, s.roll_no, s.class_name, s.section, s.school_id
         FROM students s
         WHERE 1 = 1",
    );
    let mut bind_values: Vec<Value> = Vec::new();
    if let Some(c) = class_name {
        sql.push_str(" AND s.class_name = ?");
        bind_values.push(Value::Text(c));
    }
    if let Some(sec) = section {
        sql.push_str(" AND s.section = ?");
        bind_values.push(Value::Text(sec));
    }
    sql.push_str(" ORDER BY s.class_name, s.section, s.roll_no");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let roll_no: String = row.get(2)?;
            let class_name: String = row.get(3)?;
            let section: Option<String> = row.get(4)?;
            let school_id: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "rollNo": roll_no,
                "className": class_name,
                "section": section,
                "schoolId": school_id,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "schoolId")?,
            required_str(req, "name")?,
            required_str(req, "rollNo")?,
            required_str(req, "className")?,
            optional_str(req, "section")?,
        ))
    })();
    let (school_id, name, roll_no, class_name, section) = match fields {
        Ok(v) => v,
        Err(e) => return e,
    };

    let school_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if school_exists.is_none() {
        return err(&req.id, "not_found", "school not found", None);
    }

    let student_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, name, roll_no, class_name, section, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &school_id,
            &name,
            &roll_no,
            &class_name,
            &section,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Marks reference students without ON DELETE CASCADE.
    if let Err(e) = tx.execute("DELETE FROM marks WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }
    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
