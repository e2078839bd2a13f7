use crate::error::{GradeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard};

pub const NEPAL: &str = "nepal";
pub const INTERNATIONAL: &str = "international";

/// Label reported when no band matches and the label that marks a failed result.
pub const FAIL_GRADE: &str = "F";

/// Marks are looked up at two-decimal resolution, so adjacent bands may
/// leave at most this much space between them.
const LOOKUP_STEP: f64 = 0.01;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub points: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScheme {
    pub name: String,
    pub bands: Vec<GradeBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub grade: String,
    pub points: f64,
    pub percentage: f64,
    pub description: String,
}

impl GradeResult {
    pub fn is_fail(&self) -> bool {
        self.grade == FAIL_GRADE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Division {
    #[serde(rename = "Distinction")]
    Distinction,
    #[serde(rename = "First Division")]
    FirstDivision,
    #[serde(rename = "Second Division")]
    SecondDivision,
    #[serde(rename = "Third Division")]
    ThirdDivision,
    #[serde(rename = "Fail")]
    Fail,
}

impl Division {
    pub fn as_str(self) -> &'static str {
        match self {
            Division::Distinction => "Distinction",
            Division::FirstDivision => "First Division",
            Division::SecondDivision => "Second Division",
            Division::ThirdDivision => "Third Division",
            Division::Fail => "Fail",
        }
    }
}

/// Half-up rounding on the scaled value: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimal(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Lower edges are inclusive.
pub fn class_division(percentage: f64) -> Division {
    if percentage >= 80.0 {
        Division::Distinction
    } else if percentage >= 60.0 {
        Division::FirstDivision
    } else if percentage >= 45.0 {
        Division::SecondDivision
    } else if percentage >= 32.0 {
        Division::ThirdDivision
    } else {
        Division::Fail
    }
}

/// Credit-weighted mean when `credit_hours` lines up with `gpas` and carries
/// some weight; plain mean otherwise.
pub fn calculate_cgpa(gpas: &[f64], credit_hours: Option<&[f64]>) -> f64 {
    if gpas.is_empty() {
        return 0.0;
    }

    if let Some(credits) = credit_hours.filter(|c| c.len() == gpas.len()) {
        let total_credits: f64 = credits.iter().sum();
        if total_credits > 0.0 {
            let weighted: f64 = gpas.iter().zip(credits).map(|(g, c)| g * c).sum();
            return round_off_2_decimal(weighted / total_credits);
        }
    }

    let sum: f64 = gpas.iter().sum();
    round_off_2_decimal(sum / (gpas.len() as f64))
}

fn band(label: &str, min: f64, max: f64, points: f64, description: &str) -> GradeBand {
    GradeBand {
        label: label.to_string(),
        min,
        max,
        points,
        description: description.to_string(),
    }
}

pub fn builtin_schemes() -> Vec<GradingScheme> {
    vec![
        GradingScheme {
            name: NEPAL.to_string(),
            bands: vec![
                band("A+", 90.0, 100.0, 4.0, "Outstanding"),
                band("A", 80.0, 89.99, 3.6, "Excellent"),
                band("B+", 70.0, 79.99, 3.2, "Very Good"),
                band("B", 60.0, 69.99, 2.8, "Good"),
                band("C+", 50.0, 59.99, 2.4, "Satisfactory"),
                band("C", 40.0, 49.99, 2.0, "Acceptable"),
                band("D", 32.0, 39.99, 1.6, "Basic"),
                band(FAIL_GRADE, 0.0, 31.99, 0.0, "Not Graded"),
            ],
        },
        GradingScheme {
            name: INTERNATIONAL.to_string(),
            bands: vec![
                band("A", 90.0, 100.0, 4.0, "Excellent"),
                band("B", 80.0, 89.99, 3.0, "Good"),
                band("C", 70.0, 79.99, 2.0, "Satisfactory"),
                band("D", 60.0, 69.99, 1.0, "Poor"),
                band(FAIL_GRADE, 0.0, 59.99, 0.0, "Fail"),
            ],
        },
    ]
}

// Lookups compare two-decimal marks, so an edge between grid points can open
// a hole that the gap check below cannot see.
fn on_lookup_grid(x: f64) -> bool {
    let scaled = x / LOOKUP_STEP;
    (scaled - scaled.round()).abs() < 1e-6
}

/// Checks every band on its own, then checks that the bands tile `[0, 100]`.
pub fn validate_bands(bands: &[GradeBand]) -> Result<()> {
    if bands.is_empty() {
        return Err(GradeError::invalid_band("", "scheme must define at least one band"));
    }

    let mut seen = HashSet::new();
    for b in bands {
        if b.label.trim().is_empty() {
            return Err(GradeError::invalid_band(&b.label, "label must not be empty"));
        }
        if !seen.insert(b.label.as_str()) {
            return Err(GradeError::invalid_band(&b.label, "duplicate label"));
        }
        if !b.min.is_finite() || !b.max.is_finite() || !b.points.is_finite() {
            return Err(GradeError::invalid_band(
                &b.label,
                "min, max and points must be finite numbers",
            ));
        }
        if b.min < 0.0 {
            return Err(GradeError::invalid_band(&b.label, "min must be >= 0"));
        }
        if b.max > 100.0 {
            return Err(GradeError::invalid_band(&b.label, "max must be <= 100"));
        }
        if b.min > b.max {
            return Err(GradeError::invalid_band(&b.label, "min must be <= max"));
        }
        if !on_lookup_grid(b.min) || !on_lookup_grid(b.max) {
            return Err(GradeError::invalid_band(
                &b.label,
                "min and max must be multiples of 0.01",
            ));
        }
    }

    let mut ordered: Vec<&GradeBand> = bands.iter().collect();
    ordered.sort_by(|a, b| a.min.total_cmp(&b.min));

    let first = ordered[0];
    if first.min > 0.0 {
        return Err(GradeError::invalid_band(
            &first.label,
            format!("marks below {} are not covered by any band", first.min),
        ));
    }
    for pair in ordered.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi.min <= lo.max {
            return Err(GradeError::invalid_band(
                &hi.label,
                format!("overlaps band {}", lo.label),
            ));
        }
        if hi.min - lo.max > LOOKUP_STEP + EPS {
            return Err(GradeError::invalid_band(
                &hi.label,
                format!("gap between {} and {}", lo.max, hi.min),
            ));
        }
    }
    let last = ordered[ordered.len() - 1];
    if last.max < 100.0 {
        return Err(GradeError::invalid_band(
            &last.label,
            format!("marks above {} are not covered by any band", last.max),
        ));
    }

    Ok(())
}

/// Parses a caller-supplied band list, naming the offending label when a
/// field is missing or not numeric.
pub fn parse_bands(raw: &serde_json::Value) -> Result<Vec<GradeBand>> {
    let Some(items) = raw.as_array() else {
        return Err(GradeError::InvalidInput("bands must be an array".into()));
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(GradeError::InvalidInput(format!("bands[{}] must be an object", i)));
        };
        let label = match obj.get("label").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => {
                return Err(GradeError::invalid_band(
                    &format!("#{}", i),
                    "label must be a string",
                ))
            }
        };
        let num = |key: &str| -> Result<f64> {
            obj.get(key).and_then(|v| v.as_f64()).ok_or_else(|| {
                GradeError::invalid_band(&label, format!("{} must be numeric", key))
            })
        };
        let min = num("min")?;
        let max = num("max")?;
        let points = num("points")?;
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        out.push(GradeBand {
            label,
            min,
            max,
            points,
            description,
        });
    }
    Ok(out)
}

fn grade_in(scheme: &GradingScheme, marks: f64) -> GradeResult {
    let marks = round_off_2_decimal(marks);
    match scheme
        .bands
        .iter()
        .find(|b| marks >= b.min && marks <= b.max)
    {
        Some(b) => GradeResult {
            grade: b.label.clone(),
            points: b.points,
            percentage: marks,
            description: b.description.clone(),
        },
        None => {
            tracing::warn!(scheme = %scheme.name, marks, "no grade band matched; falling back to F");
            GradeResult {
                grade: FAIL_GRADE.to_string(),
                points: 0.0,
                percentage: marks,
                description: "Fail".to_string(),
            }
        }
    }
}

fn check_marks(marks: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&marks) {
        return Err(GradeError::InvalidInput(format!(
            "marks must be between 0 and 100, got {}",
            marks
        )));
    }
    Ok(())
}

/// Owns the grading scheme table. Each scheme sits behind an `Arc` and an
/// update swaps the whole table, so a reader holds either the old or the new
/// bands for the duration of its call.
#[derive(Debug)]
pub struct GradeEngine {
    schemes: RwLock<HashMap<String, Arc<GradingScheme>>>,
    default_scheme: String,
}

impl GradeEngine {
    pub fn new(default_scheme: &str) -> Result<Self> {
        let schemes: HashMap<String, Arc<GradingScheme>> = builtin_schemes()
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        if !schemes.contains_key(default_scheme) {
            return Err(GradeError::SchemeNotFound(default_scheme.to_string()));
        }
        Ok(Self {
            schemes: RwLock::new(schemes),
            default_scheme: default_scheme.to_string(),
        })
    }

    pub fn default_scheme(&self) -> &str {
        &self.default_scheme
    }

    // The table is only ever replaced wholesale, so a poisoned lock still
    // guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<GradingScheme>>> {
        self.schemes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn scheme(&self, name: Option<&str>) -> Result<Arc<GradingScheme>> {
        let name = name.unwrap_or(&self.default_scheme);
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| GradeError::SchemeNotFound(name.to_string()))
    }

    pub fn scheme_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn calculate_grade(&self, marks: f64, scheme: Option<&str>) -> Result<GradeResult> {
        check_marks(marks)?;
        let scheme = self.scheme(scheme)?;
        Ok(grade_in(&scheme, marks))
    }

    pub fn calculate_gpa(&self, marks: &[f64], scheme: Option<&str>) -> Result<f64> {
        if marks.is_empty() {
            return Ok(0.0);
        }
        let scheme = self.scheme(scheme)?;
        let mut total_points = 0.0_f64;
        for &m in marks {
            check_marks(m)?;
            total_points += grade_in(&scheme, m).points;
        }
        Ok(round_off_2_decimal(total_points / (marks.len() as f64)))
    }

    pub fn get_grading_scheme(&self, scheme: Option<&str>) -> Option<GradingScheme> {
        self.scheme(scheme).ok().map(|s| (*s).clone())
    }

    /// Replaces the band table of an existing scheme. Nothing changes unless
    /// every band passes validation.
    pub fn update_grading_scheme(&self, scheme: &str, bands: Vec<GradeBand>) -> Result<bool> {
        if !self.read().contains_key(scheme) {
            return Err(GradeError::SchemeNotFound(scheme.to_string()));
        }
        let next = checked_scheme(scheme, bands)?;

        let band_count = next.bands.len();
        let mut table = self.schemes.write().unwrap_or_else(|e| e.into_inner());
        match table.get_mut(scheme) {
            Some(slot) => *slot = next,
            None => return Err(GradeError::SchemeNotFound(scheme.to_string())),
        }
        tracing::info!(scheme, bands = band_count, "grading scheme updated");
        Ok(true)
    }

    /// Rebuilds the table from the built-in schemes with `overrides` applied
    /// and swaps it in as a whole. Overrides for unknown schemes or with
    /// invalid bands are left out and returned alongside their error.
    pub fn reload(&self, overrides: Vec<(String, Vec<GradeBand>)>) -> Vec<(String, GradeError)> {
        let mut fresh: HashMap<String, Arc<GradingScheme>> = builtin_schemes()
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();

        let mut rejected = Vec::new();
        for (name, bands) in overrides {
            if !fresh.contains_key(&name) {
                rejected.push((name.clone(), GradeError::SchemeNotFound(name)));
                continue;
            }
            match checked_scheme(&name, bands) {
                Ok(next) => {
                    fresh.insert(name, next);
                }
                Err(e) => rejected.push((name, e)),
            }
        }

        let mut table = self.schemes.write().unwrap_or_else(|e| e.into_inner());
        *table = fresh;
        rejected
    }
}

fn checked_scheme(name: &str, bands: Vec<GradeBand>) -> Result<Arc<GradingScheme>> {
    validate_bands(&bands)?;
    let bands = bands
        .into_iter()
        .map(|b| GradeBand {
            min: snap_to_grid(b.min),
            max: snap_to_grid(b.max),
            ..b
        })
        .collect();
    Ok(Arc::new(GradingScheme {
        name: name.to_string(),
        bands,
    }))
}

// Same arithmetic as the lookup rounding, so stored edges compare exactly
// against rounded marks.
fn snap_to_grid(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
