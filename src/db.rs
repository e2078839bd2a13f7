use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DB_FILE: &str = "srms.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            district TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            full_marks REAL NOT NULL DEFAULT 100,
            pass_marks REAL NOT NULL DEFAULT 32
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            max_marks REAL NOT NULL DEFAULT 100,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id, exam_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_subject ON marks(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_keys_with_prefix(conn: &Connection, prefix: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT key FROM settings WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
    )?;
    let keys = stmt
        .query_map([prefix], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamType {
    UnitTest,
    FirstTerm,
    MidTerm,
    SecondTerm,
    #[default]
    Final,
}

impl ExamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::UnitTest => "UNIT_TEST",
            ExamType::FirstTerm => "FIRST_TERM",
            ExamType::MidTerm => "MID_TERM",
            ExamType::SecondTerm => "SECOND_TERM",
            ExamType::Final => "FINAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UNIT_TEST" => Some(ExamType::UnitTest),
            "FIRST_TERM" => Some(ExamType::FirstTerm),
            "MID_TERM" => Some(ExamType::MidTerm),
            "SECOND_TERM" => Some(ExamType::SecondTerm),
            "FINAL" => Some(ExamType::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub roll_no: String,
    pub class_name: String,
    pub section: Option<String>,
    pub school: SchoolRef,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub subject_code: String,
    pub exam_type: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
}

impl MarkRow {
    /// Marks scaled to a 0..100 percentage of `max_marks`.
    pub fn percentage(&self) -> f64 {
        if self.max_marks > 0.0 {
            100.0 * self.marks_obtained / self.max_marks
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentWithMarks {
    pub student: StudentRow,
    pub marks: Vec<MarkRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub full_marks: f64,
    pub pass_marks: f64,
}

#[derive(Debug, Clone)]
pub struct SubjectMark {
    pub student: StudentRow,
    pub mark: MarkRow,
}

const STUDENT_COLUMNS: &str = "s.id, s.name, s.roll_no, s.class_name, s.section, sc.id, sc.name";

const MARK_COLUMNS: &str = "m.id, m.student_id, m.subject_id, sub.name, sub.code, m.exam_type, m.marks_obtained, m.max_marks";

fn student_from_row(r: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(offset)?,
        name: r.get(offset + 1)?,
        roll_no: r.get(offset + 2)?,
        class_name: r.get(offset + 3)?,
        section: r.get(offset + 4)?,
        school: SchoolRef {
            id: r.get(offset + 5)?,
            name: r.get(offset + 6)?,
        },
    })
}

fn mark_from_row(r: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<MarkRow> {
    Ok(MarkRow {
        id: r.get(offset)?,
        student_id: r.get(offset + 1)?,
        subject_id: r.get(offset + 2)?,
        subject_name: r.get(offset + 3)?,
        subject_code: r.get(offset + 4)?,
        exam_type: r.get(offset + 5)?,
        marks_obtained: r.get(offset + 6)?,
        max_marks: r.get(offset + 7)?,
    })
}

fn marks_for_students(
    conn: &Connection,
    student_ids: &[String],
    exam_type: ExamType,
) -> rusqlite::Result<HashMap<String, Vec<MarkRow>>> {
    let mut out: HashMap<String, Vec<MarkRow>> = HashMap::new();
    if student_ids.is_empty() {
        return Ok(out);
    }

    let placeholders = std::iter::repeat("?")
        .take(student_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT {}
         FROM marks m
         JOIN subjects sub ON sub.id = m.subject_id
         WHERE m.exam_type = ? AND m.student_id IN ({})
         ORDER BY sub.code",
        MARK_COLUMNS, placeholders
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(student_ids.len() + 1);
    bind_values.push(Value::Text(exam_type.as_str().to_string()));
    for id in student_ids {
        bind_values.push(Value::Text(id.clone()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bind_values), |r| mark_from_row(r, 0))?;
    for row in rows {
        let mark = row?;
        out.entry(mark.student_id.clone()).or_default().push(mark);
    }
    Ok(out)
}

pub fn find_student_by_id(
    conn: &Connection,
    student_id: &str,
    exam_type: ExamType,
) -> rusqlite::Result<Option<StudentWithMarks>> {
    let sql = format!(
        "SELECT {}
         FROM students s
         JOIN schools sc ON sc.id = s.school_id
         WHERE s.id = ?",
        STUDENT_COLUMNS
    );
    let student = conn
        .query_row(&sql, [student_id], |r| student_from_row(r, 0))
        .optional()?;
    let Some(student) = student else {
        return Ok(None);
    };

    let mut by_student = marks_for_students(conn, &[student.id.clone()], exam_type)?;
    let marks = by_student.remove(&student.id).unwrap_or_default();
    Ok(Some(StudentWithMarks { student, marks }))
}

pub fn find_students_by_class(
    conn: &Connection,
    class_name: &str,
    section: Option<&str>,
    exam_type: ExamType,
) -> rusqlite::Result<Vec<StudentWithMarks>> {
    let mut sql = format!(
        "SELECT {}
         FROM students s
         JOIN schools sc ON sc.id = s.school_id
         WHERE s.class_name = ?",
        STUDENT_COLUMNS
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(class_name.to_string())];
    if let Some(sec) = section {
        sql.push_str(" AND s.section = ?");
        bind_values.push(Value::Text(sec.to_string()));
    }
    sql.push_str(" ORDER BY s.roll_no, s.name");

    let mut stmt = conn.prepare(&sql)?;
    let students: Vec<StudentRow> = stmt
        .query_map(params_from_iter(bind_values), |r| student_from_row(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
    let mut marks = marks_for_students(conn, &ids, exam_type)?;
    Ok(students
        .into_iter()
        .map(|student| {
            let m = marks.remove(&student.id).unwrap_or_default();
            StudentWithMarks { student, marks: m }
        })
        .collect())
}

pub fn find_subject(conn: &Connection, subject_id: &str) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, name, code, full_marks, pass_marks FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                name: r.get(1)?,
                code: r.get(2)?,
                full_marks: r.get(3)?,
                pass_marks: r.get(4)?,
            })
        },
    )
    .optional()
}

pub fn find_marks_by_subject(
    conn: &Connection,
    subject_id: &str,
    class_name: Option<&str>,
    section: Option<&str>,
    exam_type: Option<ExamType>,
) -> rusqlite::Result<Vec<SubjectMark>> {
    let mut sql = format!(
        "SELECT {}, {}
         FROM marks m
         JOIN subjects sub ON sub.id = m.subject_id
         JOIN students s ON s.id = m.student_id
         JOIN schools sc ON sc.id = s.school_id
         WHERE m.subject_id = ?",
        MARK_COLUMNS, STUDENT_COLUMNS
    );
    let mut bind_values: Vec<Value> = vec![Value::Text(subject_id.to_string())];
    if let Some(c) = class_name {
        sql.push_str(" AND s.class_name = ?");
        bind_values.push(Value::Text(c.to_string()));
    }
    if let Some(sec) = section {
        sql.push_str(" AND s.section = ?");
        bind_values.push(Value::Text(sec.to_string()));
    }
    if let Some(e) = exam_type {
        sql.push_str(" AND m.exam_type = ?");
        bind_values.push(Value::Text(e.as_str().to_string()));
    }
    sql.push_str(" ORDER BY s.roll_no, s.name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(SubjectMark {
                mark: mark_from_row(r, 0)?,
                student: student_from_row(r, 8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
