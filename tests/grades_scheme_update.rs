use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_in(None)
}

fn spawn_sidecar_in(workspace: Option<&Path>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_srmsd");
    let mut cmd = Command::new(exe);
    match workspace {
        Some(ws) => cmd.env("SRMS_WORKSPACE", ws),
        None => cmd.env_remove("SRMS_WORKSPACE"),
    };
    let mut child = cmd
        .env_remove("SRMS_DEFAULT_SCHEME")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn srmsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn pass_fail_bands() -> serde_json::Value {
    json!([
        { "label": "P", "min": 40, "max": 100, "points": 4.0, "description": "Pass" },
        { "label": "F", "min": 0, "max": 39.99, "points": 0.0, "description": "Fail" }
    ])
}

#[test]
fn invalid_band_update_is_rejected_and_table_kept() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let before = request_ok(&mut stdin, &mut reader, "1", "grades.scheme.get", json!({}));
    assert_eq!(before["scheme"]["name"], "nepal");
    assert_eq!(before["scheme"]["bands"].as_array().map(|b| b.len()), Some(8));

    let bad = request_raw(
        &mut stdin,
        &mut reader,
        "2",
        "grades.scheme.update",
        json!({
            "scheme": "nepal",
            "bands": [
                { "label": "P", "min": 40, "max": 100, "points": 4.0 },
                { "label": "F", "min": 39, "max": 10, "points": 0.0 }
            ]
        }),
    );
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "invalid_band");
    assert_eq!(bad["error"]["details"]["label"], "F");

    let gap = request_raw(
        &mut stdin,
        &mut reader,
        "3",
        "grades.scheme.update",
        json!({
            "scheme": "nepal",
            "bands": [{ "label": "P", "min": 50, "max": 100, "points": 4.0 }]
        }),
    );
    assert_eq!(gap["error"]["code"], "invalid_band");

    let missing = request_raw(
        &mut stdin,
        &mut reader,
        "4",
        "grades.scheme.update",
        json!({ "scheme": "klingon", "bands": pass_fail_bands() }),
    );
    assert_eq!(missing["error"]["code"], "scheme_not_found");

    let after = request_ok(&mut stdin, &mut reader, "5", "grades.scheme.get", json!({}));
    assert_eq!(after["scheme"], before["scheme"]);

    let g = request_ok(&mut stdin, &mut reader, "6", "grades.calculate", json!({ "marks": 89 }));
    assert_eq!(g["grade"], "A");

    let out_of_range = request_raw(
        &mut stdin,
        &mut reader,
        "7",
        "grades.calculate",
        json!({ "marks": 101 }),
    );
    assert_eq!(out_of_range["error"]["code"], "invalid_input");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn stored_scheme_override_survives_workspace_reselect() {
    let workspace = temp_dir("srms-scheme-persist");

    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let updated = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "grades.scheme.update",
            json!({ "scheme": "international", "bands": pass_fail_bands() }),
        );
        assert_eq!(updated["updated"], true);
        assert_eq!(updated["persisted"], true);

        let g = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "grades.calculate",
            json!({ "marks": 45, "scheme": "international" }),
        );
        assert_eq!(g["grade"], "P");
        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    // Fresh process starts from the built-in table.
    let g = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.calculate",
        json!({ "marks": 45, "scheme": "international" }),
    );
    assert_eq!(g["grade"], "F");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["restoredSchemes"], 1);

    let g = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.calculate",
        json!({ "marks": 45, "scheme": "international" }),
    );
    assert_eq!(g["grade"], "P");

    // The default scheme was never touched.
    let nepal = request_ok(&mut stdin, &mut reader, "4", "grades.calculate", json!({ "marks": 45 }));
    assert_eq!(nepal["grade"], "C");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn switching_workspaces_drops_the_previous_override() {
    let first = temp_dir("srms-scheme-ws-a");
    let second = temp_dir("srms-scheme-ws-b");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // An update made before any workspace is open is not carried into one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "0",
        "grades.scheme.update",
        json!({ "scheme": "international", "bands": pass_fail_bands() }),
    );

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": first.to_string_lossy() }),
    );
    assert_eq!(selected["restoredSchemes"], 0);
    let g = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.calculate",
        json!({ "marks": 95, "scheme": "international" }),
    );
    assert_eq!(g["grade"], "A");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.scheme.update",
        json!({ "scheme": "nepal", "bands": pass_fail_bands() }),
    );
    assert_eq!(updated["persisted"], true);
    let g = request_ok(&mut stdin, &mut reader, "4", "grades.calculate", json!({ "marks": 95 }));
    assert_eq!(g["grade"], "P");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": second.to_string_lossy() }),
    );
    assert_eq!(selected["restoredSchemes"], 0);
    let g = request_ok(&mut stdin, &mut reader, "6", "grades.calculate", json!({ "marks": 95 }));
    assert_eq!(g["grade"], "A+");
    let scheme = request_ok(&mut stdin, &mut reader, "7", "grades.scheme.get", json!({}));
    assert_eq!(scheme["scheme"]["bands"].as_array().map(|b| b.len()), Some(8));

    // Going back restores the first workspace's table.
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": first.to_string_lossy() }),
    );
    assert_eq!(selected["restoredSchemes"], 1);
    let g = request_ok(&mut stdin, &mut reader, "9", "grades.calculate", json!({ "marks": 95 }));
    assert_eq!(g["grade"], "P");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn startup_workspace_loads_its_stored_override() {
    let workspace = temp_dir("srms-scheme-startup");
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "grades.scheme.update",
            json!({ "scheme": "nepal", "bands": pass_fail_bands() }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar_in(Some(&workspace));
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    let g = request_ok(&mut stdin, &mut reader, "2", "grades.calculate", json!({ "marks": 95 }));
    assert_eq!(g["grade"], "P");

    let other = temp_dir("srms-scheme-startup-other");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": other.to_string_lossy() }),
    );
    let g = request_ok(&mut stdin, &mut reader, "4", "grades.calculate", json!({ "marks": 95 }));
    assert_eq!(g["grade"], "A+");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn gpa_cgpa_and_division_over_ipc() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let empty = request_ok(&mut stdin, &mut reader, "1", "grades.gpa", json!({ "marks": [] }));
    assert_eq!(empty["gpa"].as_f64(), Some(0.0));
    let one = request_ok(&mut stdin, &mut reader, "2", "grades.gpa", json!({ "marks": [90] }));
    assert_eq!(one["gpa"].as_f64(), Some(4.0));

    let weighted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.cgpa",
        json!({ "gpas": [3.0, 3.5], "creditHours": [10, 20] }),
    );
    assert_eq!(weighted["cgpa"].as_f64(), Some(3.33));
    let plain = request_ok(&mut stdin, &mut reader, "4", "grades.cgpa", json!({ "gpas": [3.0, 3.5] }));
    assert_eq!(plain["cgpa"].as_f64(), Some(3.25));

    for (i, (pct, expected)) in [
        (80.0, "Distinction"),
        (79.99, "First Division"),
        (32.0, "Third Division"),
        (31.99, "Fail"),
    ]
    .iter()
    .enumerate()
    {
        let d = request_ok(
            &mut stdin,
            &mut reader,
            &format!("d{}", i),
            "grades.division",
            json!({ "percentage": pct }),
        );
        assert_eq!(d["division"], *expected);
    }

    drop(stdin);
    let _ = child.wait();
}
