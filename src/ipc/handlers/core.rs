use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grades;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "defaultScheme": state.engine.default_scheme(),
            "schemes": state.engine.scheme_names(),
        }),
    )
}

/// Opens (or creates) the workspace database and resets the engine to the
/// built-in schemes plus this workspace's stored overrides.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<usize> {
    let conn = db::open_db(path)?;
    // Stored overrides must not prevent the workspace from opening.
    let restored = grades::restore_stored_schemes(&conn, &state.engine);
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(workspace = %path.display(), restored, "workspace selected");
    Ok(restored)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match select_workspace(state, &path) {
        Ok(restored) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "restoredSchemes": restored,
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
