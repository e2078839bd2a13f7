use thiserror::Error;

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("grading scheme not found: {0}")]
    SchemeNotFound(String),

    #[error("invalid band {label}: {reason}")]
    InvalidBand { label: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl GradeError {
    pub fn invalid_band(label: &str, reason: impl Into<String>) -> Self {
        GradeError::InvalidBand {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::InvalidInput(_) => "invalid_input",
            GradeError::SchemeNotFound(_) => "scheme_not_found",
            GradeError::InvalidBand { .. } => "invalid_band",
            GradeError::NotFound(_) => "not_found",
            GradeError::Persistence(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            GradeError::InvalidBand { label, .. } => Some(serde_json::json!({ "label": label })),
            GradeError::SchemeNotFound(name) => Some(serde_json::json!({ "scheme": name })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
