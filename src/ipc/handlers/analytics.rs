use crate::calc::{self, CalcContext};
use crate::ipc::error::{grade_err, ok_serialized};
use crate::ipc::helpers::{db_conn, exam_type_param, optional_exam_type, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_class_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match optional_str(req, "section") {
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
    match calc::calculate_class_statistics(&ctx, &class_name, section.as_deref(), exam_type) {
        Ok(stats) => ok_serialized(&req.id, &stats),
        Err(e) => grade_err(&req.id, &e),
    }
}

fn handle_subject_analysis(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
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
    // No examType means every sitting counts.
    let exam_type = match optional_exam_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = CalcContext {
        conn,
        engine: &state.engine,
    };
    match calc::calculate_subject_analysis(
        &ctx,
        &subject_id,
        class_name.as_deref(),
        section.as_deref(),
        exam_type,
    ) {
        Ok(analysis) => ok_serialized(&req.id, &analysis),
        Err(e) => grade_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.classStatistics" => Some(handle_class_statistics(state, req)),
        "analytics.subjectAnalysis" => Some(handle_subject_analysis(state, req)),
        _ => None,
    }
}
