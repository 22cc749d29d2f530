use crate::calc::CalcError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Failures surfaced at an operation boundary (one request, one import run).
#[derive(Debug, Error)]
pub enum NotasError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid assessment: {0}")]
    InvalidAssessment(String),

    #[error("no grades")]
    NoGrades,

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, NotasError>;

impl NotasError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wire code reported to the presentation layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::InvalidAssessment(_) => "invalid_assessment",
            Self::NoGrades => "no_grades",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "db_error",
        }
    }

    /// Maps a unique-constraint failure on a direct insert to `Conflict`,
    /// leaving every other storage failure untouched.
    pub fn from_insert(e: rusqlite::Error, what: &str) -> Self {
        if is_unique_violation(&e) {
            Self::Conflict(what.to_string())
        } else {
            Self::Storage(e)
        }
    }
}

impl From<CalcError> for NotasError {
    fn from(e: CalcError) -> Self {
        match e {
            CalcError::NoGrades => Self::NoGrades,
            other => Self::InvalidAssessment(other.to_string()),
        }
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.code == ErrorCode::ConstraintViolation
                && (f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}
