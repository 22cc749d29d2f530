use crate::calc::{self, round_off_1_decimal, ScaleConfig, ScoredResult};
use crate::error::{NotasError, Result};
use crate::store::{self, Entity, GradeRow};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub subject_id: i64,
    pub code: String,
    pub name: String,
    pub weighted_pct: f64,
    pub grade: f64,
    pub assessment_count: usize,
}

/// A subject whose grades could not be aggregated (bad assessment data).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFailure {
    pub subject_id: i64,
    pub code: String,
    pub name: String,
    pub error_code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub per_subject: Vec<SubjectGrade>,
    pub failures: Vec<SubjectFailure>,
    /// `None` until at least one subject has a weighted grade.
    pub overall_grade: Option<f64>,
    pub has_grades: bool,
}

/// Groups rows by subject code, aggregates each group and converts it with
/// `scale`. Subjects without weight are left out; subjects with invalid
/// assessments are reported in `failures` and left out of the overall grade.
pub fn build_report(rows: &[GradeRow], scale: &ScaleConfig) -> StudentReport {
    let mut groups: BTreeMap<&str, Vec<&GradeRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.subject_code.as_str()).or_default().push(row);
    }

    let mut per_subject = Vec::new();
    let mut failures = Vec::new();
    for group in groups.values() {
        let head = group[0];
        let results = group.iter().map(|r| ScoredResult {
            score: r.score,
            max_score: r.max_score,
            weight: r.weight,
        });
        match calc::weighted_percentage(results).map_err(NotasError::from) {
            Ok(pct) => per_subject.push(SubjectGrade {
                subject_id: head.subject_id,
                code: head.subject_code.clone(),
                name: head.subject_name.clone(),
                weighted_pct: round_off_1_decimal(pct),
                grade: scale.grade_for(pct),
                assessment_count: group.len(),
            }),
            Err(NotasError::NoGrades) => {}
            Err(e) => failures.push(SubjectFailure {
                subject_id: head.subject_id,
                code: head.subject_code.clone(),
                name: head.subject_name.clone(),
                error_code: e.code(),
                message: e.to_string(),
            }),
        }
    }

    let overall_grade = if per_subject.is_empty() {
        None
    } else {
        let sum: f64 = per_subject.iter().map(|s| s.grade).sum();
        Some(round_off_1_decimal(sum / per_subject.len() as f64))
    };

    StudentReport {
        has_grades: overall_grade.is_some(),
        per_subject,
        failures,
        overall_grade,
    }
}

pub fn student_report(
    conn: &Connection,
    student_id: i64,
    year: i64,
    scale: &ScaleConfig,
) -> Result<StudentReport> {
    store::require(conn, Entity::Student, student_id)?;
    let rows = store::grade_rows_for_student(conn, student_id, year)?;
    Ok(build_report(&rows, scale))
}
