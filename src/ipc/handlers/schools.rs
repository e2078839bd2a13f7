use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schools": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           sc.id,
           sc.name,
           sc.district,
           (SELECT COUNT(*) FROM students s WHERE s.school_id = sc.id) AS student_count
         FROM schools sc
         ORDER BY sc.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let district: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "district": district,
                "studentCount": student_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let district = match optional_str(req, "district") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name, district) VALUES(?, ?, ?)",
        (&school_id, &name, &district),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }

    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.create" => Some(handle_schools_create(state, req)),
        _ => None,
    }
}
