use crate::db::{self, ExamType, MarkRow, SchoolRef, StudentRow, SubjectRow};
use crate::error::{GradeError, Result};
use crate::grading::{round_off_2_decimal, Division, GradeEngine, GradeResult};
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub engine: &'a GradeEngine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordStatus {
    Pass,
    Fail,
    #[serde(rename = "No marks available")]
    NoMarks,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_code: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    #[serde(flatten)]
    pub result: GradeResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub total_subjects: usize,
    pub total_marks: f64,
    pub average_marks: f64,
    pub overall_grade: Option<String>,
    pub gpa: f64,
    pub division: Option<Division>,
    pub status: RecordStatus,
}

impl RecordSummary {
    fn no_marks() -> Self {
        Self {
            total_subjects: 0,
            total_marks: 0.0,
            average_marks: 0.0,
            overall_grade: None,
            gpa: 0.0,
            division: None,
            status: RecordStatus::NoMarks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAcademicRecord {
    pub student: StudentRow,
    pub school: SchoolRef,
    pub exam_type: ExamType,
    pub summary: RecordSummary,
    pub subjects: Vec<SubjectGrade>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub name: String,
    pub roll_no: String,
    pub section: Option<String>,
    pub total_subjects: usize,
    pub average_marks: f64,
    pub gpa: f64,
    pub grade: String,
    pub division: Division,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub class_name: String,
    pub section: Option<String>,
    pub exam_type: ExamType,
    pub total_students: usize,
    pub students_with_marks: usize,
    pub average_percentage: f64,
    pub average_gpa: f64,
    pub highest_percentage: f64,
    pub lowest_percentage: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_percentage: f64,
    pub grade_distribution: BTreeMap<String, usize>,
    pub division_distribution: BTreeMap<String, usize>,
    pub students: Vec<StudentStanding>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStanding {
    pub student_id: String,
    pub name: String,
    pub roll_no: String,
    pub class_name: String,
    pub section: Option<String>,
    pub exam_type: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub points: f64,
}

/// Without an exam type filter a student may contribute one entry per
/// sitting. `total_students` counts distinct students; the aggregates and
/// `students` work per entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAnalysis {
    pub subject: Option<SubjectRow>,
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub exam_type: Option<ExamType>,
    pub total_students: usize,
    pub total_entries: usize,
    pub average_marks: f64,
    pub highest_marks: f64,
    pub lowest_marks: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_percentage: f64,
    pub grade_distribution: BTreeMap<String, usize>,
    pub students: Vec<SubjectStanding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    pub success: bool,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StudentAcademicRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
}

fn percent_of(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_off_2_decimal(100.0 * (part as f64) / (whole as f64))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

/// Grades each mark and folds them into a summary. `marks` must be non-empty.
fn summarize(engine: &GradeEngine, marks: &[MarkRow]) -> Result<(RecordSummary, Vec<SubjectGrade>)> {
    let mut subjects = Vec::with_capacity(marks.len());
    let mut percentages = Vec::with_capacity(marks.len());
    let mut total_marks = 0.0_f64;

    for m in marks {
        let pct = m.percentage();
        let result = engine.calculate_grade(pct, None).map_err(|e| match e {
            GradeError::InvalidInput(msg) => GradeError::InvalidInput(format!(
                "{} ({} {}/{})",
                msg, m.subject_code, m.marks_obtained, m.max_marks
            )),
            other => other,
        })?;
        total_marks += m.marks_obtained;
        percentages.push(pct);
        subjects.push(SubjectGrade {
            subject_id: m.subject_id.clone(),
            subject_name: m.subject_name.clone(),
            subject_code: m.subject_code.clone(),
            marks_obtained: m.marks_obtained,
            max_marks: m.max_marks,
            result,
        });
    }

    let average_marks = round_off_2_decimal(mean(&percentages));
    let overall = engine.calculate_grade(average_marks, None)?;
    let gpa = engine.calculate_gpa(&percentages, None)?;
    let status = if overall.is_fail() {
        RecordStatus::Fail
    } else {
        RecordStatus::Pass
    };

    Ok((
        RecordSummary {
            total_subjects: marks.len(),
            total_marks: round_off_2_decimal(total_marks),
            average_marks,
            overall_grade: Some(overall.grade),
            gpa,
            division: Some(crate::grading::class_division(average_marks)),
            status,
        },
        subjects,
    ))
}

#[tracing::instrument(skip(ctx))]
pub fn calculate_student_record(
    ctx: &CalcContext<'_>,
    student_id: &str,
    exam_type: ExamType,
) -> Result<StudentAcademicRecord> {
    let Some(found) = db::find_student_by_id(ctx.conn, student_id, exam_type)? else {
        return Err(GradeError::NotFound(format!("student not found: {}", student_id)));
    };

    let school = found.student.school.clone();
    if found.marks.is_empty() {
        tracing::debug!("student has no marks for exam type");
        return Ok(StudentAcademicRecord {
            student: found.student,
            school,
            exam_type,
            summary: RecordSummary::no_marks(),
            subjects: Vec::new(),
        });
    }

    let (summary, subjects) = summarize(ctx.engine, &found.marks)?;
    Ok(StudentAcademicRecord {
        student: found.student,
        school,
        exam_type,
        summary,
        subjects,
    })
}

#[tracing::instrument(skip(ctx))]
pub fn calculate_class_statistics(
    ctx: &CalcContext<'_>,
    class_name: &str,
    section: Option<&str>,
    exam_type: ExamType,
) -> Result<ClassStatistics> {
    let students = db::find_students_by_class(ctx.conn, class_name, section, exam_type)?;
    let total_students = students.len();

    let mut standings: Vec<StudentStanding> = Vec::new();
    let mut grade_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut division_distribution: BTreeMap<String, usize> = BTreeMap::new();

    for s in &students {
        if s.marks.is_empty() {
            continue;
        }
        let (summary, _) = summarize(ctx.engine, &s.marks)?;
        let grade = summary.overall_grade.unwrap_or_default();
        let division = summary
            .division
            .unwrap_or_else(|| crate::grading::class_division(summary.average_marks));
        *grade_distribution.entry(grade.clone()).or_insert(0) += 1;
        *division_distribution
            .entry(division.as_str().to_string())
            .or_insert(0) += 1;
        standings.push(StudentStanding {
            student_id: s.student.id.clone(),
            name: s.student.name.clone(),
            roll_no: s.student.roll_no.clone(),
            section: s.student.section.clone(),
            total_subjects: summary.total_subjects,
            average_marks: summary.average_marks,
            gpa: summary.gpa,
            grade,
            division,
            status: summary.status,
        });
    }

    standings.sort_by(|a, b| {
        b.average_marks
            .partial_cmp(&a.average_marks)
            .unwrap_or(Ordering::Equal)
    });

    let with_marks = standings.len();
    let averages: Vec<f64> = standings.iter().map(|s| s.average_marks).collect();
    let gpas: Vec<f64> = standings.iter().map(|s| s.gpa).collect();
    let pass_count = standings
        .iter()
        .filter(|s| s.status == RecordStatus::Pass)
        .count();

    tracing::debug!(total_students, with_marks, "class statistics computed");

    Ok(ClassStatistics {
        class_name: class_name.to_string(),
        section: section.map(|s| s.to_string()),
        exam_type,
        total_students,
        students_with_marks: with_marks,
        average_percentage: round_off_2_decimal(mean(&averages)),
        average_gpa: round_off_2_decimal(mean(&gpas)),
        highest_percentage: averages.iter().copied().reduce(f64::max).unwrap_or(0.0),
        lowest_percentage: averages.iter().copied().reduce(f64::min).unwrap_or(0.0),
        pass_count,
        fail_count: with_marks - pass_count,
        pass_percentage: percent_of(pass_count, with_marks),
        grade_distribution,
        division_distribution,
        students: standings,
    })
}

#[tracing::instrument(skip(ctx))]
pub fn calculate_subject_analysis(
    ctx: &CalcContext<'_>,
    subject_id: &str,
    class_name: Option<&str>,
    section: Option<&str>,
    exam_type: Option<ExamType>,
) -> Result<SubjectAnalysis> {
    let Some(subject) = db::find_subject(ctx.conn, subject_id)? else {
        return Err(GradeError::NotFound(format!("subject not found: {}", subject_id)));
    };
    let rows = db::find_marks_by_subject(ctx.conn, subject_id, class_name, section, exam_type)?;

    let mut standings: Vec<SubjectStanding> = Vec::with_capacity(rows.len());
    let mut grade_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut pass_count = 0_usize;

    for row in &rows {
        let pct = row.mark.percentage();
        let result = ctx.engine.calculate_grade(pct, None)?;
        if !result.is_fail() {
            pass_count += 1;
        }
        *grade_distribution.entry(result.grade.clone()).or_insert(0) += 1;
        standings.push(SubjectStanding {
            student_id: row.student.id.clone(),
            name: row.student.name.clone(),
            roll_no: row.student.roll_no.clone(),
            class_name: row.student.class_name.clone(),
            section: row.student.section.clone(),
            exam_type: row.mark.exam_type.clone(),
            marks_obtained: row.mark.marks_obtained,
            max_marks: row.mark.max_marks,
            percentage: result.percentage,
            grade: result.grade,
            points: result.points,
        });
    }

    standings.sort_by(|a, b| {
        b.marks_obtained
            .partial_cmp(&a.marks_obtained)
            .unwrap_or(Ordering::Equal)
    });

    let total = standings.len();
    let distinct_students = standings
        .iter()
        .map(|s| s.student_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let percentages: Vec<f64> = standings.iter().map(|s| s.percentage).collect();

    Ok(SubjectAnalysis {
        // An existing subject with no marks reports a null subject.
        subject: if total == 0 { None } else { Some(subject) },
        class_name: class_name.map(|s| s.to_string()),
        section: section.map(|s| s.to_string()),
        exam_type,
        total_students: distinct_students,
        total_entries: total,
        average_marks: round_off_2_decimal(mean(&percentages)),
        highest_marks: percentages.iter().copied().reduce(f64::max).unwrap_or(0.0),
        lowest_marks: percentages.iter().copied().reduce(f64::min).unwrap_or(0.0),
        pass_count,
        fail_count: total - pass_count,
        pass_percentage: percent_of(pass_count, total),
        grade_distribution,
        students: standings,
    })
}

/// One entry per id, in input order. A failing id never stops the rest.
pub fn bulk_calculate_grades(
    ctx: &CalcContext<'_>,
    student_ids: &[String],
    exam_type: ExamType,
) -> Vec<BulkEntry> {
    student_ids
        .iter()
        .map(|id| match calculate_student_record(ctx, id, exam_type) {
            Ok(record) => BulkEntry {
                success: true,
                student_id: id.clone(),
                data: Some(record),
                error: None,
            },
            Err(e) => {
                tracing::warn!(student_id = %id, error = %e, "bulk grade entry failed");
                BulkEntry {
                    success: false,
                    student_id: id.clone(),
                    data: None,
                    error: Some(EntryError {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        })
        .collect()
}
