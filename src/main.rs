mod calc;
mod config;
mod db;
mod error;
mod grading;
mod ipc;

use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(filter: &str) {
    // stdout carries responses; logs go to stderr.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);
    let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    init_logging(&cfg.log_filter);

    let engine = grading::GradeEngine::new(&cfg.default_scheme)?;
    let mut state = ipc::AppState::new(engine);
    if let Some(ws) = cfg.workspace.as_deref() {
        ipc::select_workspace(&mut state, ws)?;
    }
    tracing::info!(default_scheme = %cfg.default_scheme, "srmsd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                let body = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", body);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    Ok(())
}
