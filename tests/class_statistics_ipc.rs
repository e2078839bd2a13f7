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
    let exe = env!("CARGO_BIN_EXE_srmsd");
    let mut child = Command::new(exe)
        .env_remove("SRMS_WORKSPACE")
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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("srms.sqlite3")
}

fn seed_class(workspace: &Path) {
    use rusqlite::Connection;
    let conn = Connection::open(db_path(workspace)).expect("open db");
    conn.execute("INSERT INTO schools(id, name) VALUES('sc1','Valley High')", [])
        .expect("school");
    conn.execute(
        "INSERT INTO students(id, school_id, name, roll_no, class_name, section)
         VALUES('s1','sc1','Asha','01','10','A'),
               ('s2','sc1','Bikash','02','10','A'),
               ('s3','sc1','Chandra','03','10','B'),
               ('s4','sc1','Dipa','04','10','A'),
               ('s5','sc1','Elina','05','9','A')",
        [],
    )
    .expect("students");
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES('mth','Maths','MTH'), ('sci','Science','SCI'), ('art','Art','ART')",
        [],
    )
    .expect("subjects");
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_type, marks_obtained, max_marks)
         VALUES('m1','s1','mth','FINAL',92,100),
               ('m2','s1','sci','FINAL',84,100),
               ('m3','s2','mth','FINAL',25,100),
               ('m4','s2','sci','FINAL',30,100),
               ('m5','s3','mth','FINAL',65,100),
               ('m6','s3','sci','FINAL',70,100),
               ('m7','s5','mth','FINAL',99,100),
               ('m8','s1','mth','FIRST_TERM',40,100)",
        [],
    )
    .expect("marks");
}

#[test]
fn class_statistics_and_subject_analysis_over_seeded_workspace() {
    let workspace = temp_dir("srms-class-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&workspace);

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.classStatistics",
        json!({ "className": "10" }),
    );
    assert_eq!(stats["totalStudents"], 4);
    assert_eq!(stats["studentsWithMarks"], 3);
    assert_eq!(stats["passCount"], 2);
    assert_eq!(stats["failCount"], 1);
    assert_eq!(stats["passPercentage"].as_f64(), Some(66.67));
    assert_eq!(stats["highestPercentage"].as_f64(), Some(88.0));
    assert_eq!(stats["lowestPercentage"].as_f64(), Some(27.5));
    assert_eq!(stats["gradeDistribution"]["A"], 1);
    assert_eq!(stats["gradeDistribution"]["B"], 1);
    assert_eq!(stats["gradeDistribution"]["F"], 1);
    assert_eq!(stats["divisionDistribution"]["Fail"], 1);
    let order: Vec<&str> = stats["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["studentId"].as_str())
        .collect();
    assert_eq!(order, vec!["s1", "s3", "s2"]);

    let section_b = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "analytics.classStatistics",
        json!({ "className": "10", "section": "B" }),
    );
    assert_eq!(section_b["totalStudents"], 1);
    assert_eq!(section_b["passPercentage"].as_f64(), Some(100.0));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "analytics.classStatistics",
        json!({ "className": "10", "examType": "MID_TERM" }),
    );
    assert_eq!(empty["studentsWithMarks"], 0);
    assert_eq!(empty["averagePercentage"].as_f64(), Some(0.0));
    assert_eq!(empty["gradeDistribution"], json!({}));

    let maths = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.subjectAnalysis",
        json!({ "subjectId": "mth", "className": "10", "examType": "FINAL" }),
    );
    assert_eq!(maths["subject"]["code"], "MTH");
    assert_eq!(maths["totalStudents"], 3);
    assert_eq!(maths["passCount"], 2);
    assert_eq!(maths["highestMarks"].as_f64(), Some(92.0));
    let marks: Vec<f64> = maths["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["marksObtained"].as_f64())
        .collect();
    assert_eq!(marks, vec![92.0, 65.0, 25.0]);

    // Every sitting and class when no filters are given.
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.subjectAnalysis",
        json!({ "subjectId": "mth" }),
    );
    // Asha sat maths twice: one student, two entries.
    assert_eq!(all["totalStudents"], 4);
    assert_eq!(all["totalEntries"], 5);
    assert_eq!(all["students"][0]["studentId"], "s5");

    let art = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "analytics.subjectAnalysis",
        json!({ "subjectId": "art" }),
    );
    assert!(art["subject"].is_null());
    assert_eq!(art["totalStudents"], 0);

    drop(stdin);
    let _ = child.wait();
}
