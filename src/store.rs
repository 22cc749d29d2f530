//! Storage collaborator: typed, parameterized access to the workspace
//! database. Every function takes the connection (or an open transaction,
//! which derefs to one) explicitly.

use crate::error::{NotasError, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Student,
    Subject,
    Course,
    Enrollment,
    Assessment,
    Grade,
}

impl Entity {
    fn table(self) -> &'static str {
        match self {
            Self::Student => "students",
            Self::Subject => "subjects",
            Self::Course => "courses",
            Self::Enrollment => "enrollments",
            Self::Assessment => "assessments",
            Self::Grade => "grades",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Subject => "subject",
            Self::Course => "course",
            Self::Enrollment => "enrollment",
            Self::Assessment => "assessment",
            Self::Grade => "grade",
        }
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Chilean RUN as stored: no dots or spaces, check digit upper-cased.
pub fn normalize_run(run: &str) -> String {
    run.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_ascii_uppercase()
}

pub fn require(conn: &Connection, entity: Entity, id: i64) -> Result<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", entity.table());
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(NotasError::NotFound(entity.label().to_string())),
    }
}

/// Deletes one row; dependents go with it through the schema cascades.
pub fn delete(conn: &Connection, entity: Entity, id: i64) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE id = ?", entity.table());
    let n = conn.execute(&sql, [id])?;
    if n == 0 {
        return Err(NotasError::NotFound(entity.label().to_string()));
    }
    Ok(())
}

// ---------- students ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub run: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub run: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

pub fn list_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, run, first_name, last_name, email, created_at
         FROM students
         ORDER BY last_name, first_name, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Student {
                id: r.get(0)?,
                run: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
                email: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_student_by_run(conn: &Connection, run: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM students WHERE run = ?",
            [normalize_run(run)],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn find_student_by_email(conn: &Connection, email: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM students WHERE lower(email) = lower(?) ORDER BY id LIMIT 1",
            [email.trim()],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn insert_student(conn: &Connection, s: &NewStudent) -> Result<i64> {
    let run = s.run.as_deref().map(normalize_run).filter(|r| !r.is_empty());
    conn.execute(
        "INSERT INTO students(run, first_name, last_name, email, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &run,
            s.first_name.trim(),
            s.last_name.trim(),
            s.email.as_deref().map(str::trim),
            now_timestamp(),
        ),
    )
    .map_err(|e| NotasError::from_insert(e, "student with this run"))?;
    Ok(conn.last_insert_rowid())
}

pub fn update_student(conn: &Connection, id: i64, s: &NewStudent) -> Result<()> {
    let run = s.run.as_deref().map(normalize_run).filter(|r| !r.is_empty());
    let n = conn
        .execute(
            "UPDATE students SET run = ?, first_name = ?, last_name = ?, email = ? WHERE id = ?",
            (
                &run,
                s.first_name.trim(),
                s.last_name.trim(),
                s.email.as_deref().map(str::trim),
                id,
            ),
        )
        .map_err(|e| NotasError::from_insert(e, "student with this run"))?;
    if n == 0 {
        return Err(NotasError::NotFound("student".to_string()));
    }
    Ok(())
}

// ---------- subjects ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: i64,
    pub code: String,
    pub name: String,
}

pub fn list_subjects(conn: &Connection) -> Result<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM subjects ORDER BY code")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_subject(conn: &Connection, code: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO subjects(code, name) VALUES(?, ?)",
        (code.trim(), name.trim()),
    )
    .map_err(|e| NotasError::from_insert(e, "subject with this code"))?;
    Ok(conn.last_insert_rowid())
}

pub fn update_subject(conn: &Connection, id: i64, code: &str, name: &str) -> Result<()> {
    let n = conn
        .execute(
            "UPDATE subjects SET code = ?, name = ? WHERE id = ?",
            (code.trim(), name.trim(), id),
        )
        .map_err(|e| NotasError::from_insert(e, "subject with this code"))?;
    if n == 0 {
        return Err(NotasError::NotFound("subject".to_string()));
    }
    Ok(())
}

/// Get-or-create by unique code. An existing subject keeps its name.
pub fn get_or_create_subject(conn: &Connection, code: &str, name: &str) -> Result<(i64, bool)> {
    let created = conn.execute(
        "INSERT INTO subjects(code, name) VALUES(?, ?) ON CONFLICT(code) DO NOTHING",
        (code, name),
    )? > 0;
    let id = conn.query_row("SELECT id FROM subjects WHERE code = ?", [code], |r| {
        r.get(0)
    })?;
    Ok((id, created))
}

// ---------- courses ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub year: i64,
    pub subject_count: i64,
    pub student_count: i64,
}

pub fn list_courses(conn: &Connection, year: Option<i64>) -> Result<Vec<Course>> {
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.year,
           (SELECT COUNT(*) FROM course_subjects cs WHERE cs.course_id = c.id),
           (SELECT COUNT(*) FROM student_courses sc WHERE sc.course_id = c.id)
         FROM courses c
         WHERE ?1 IS NULL OR c.year = ?1
         ORDER BY c.year DESC, c.name",
    )?;
    let rows = stmt
        .query_map([year], |r| {
            Ok(Course {
                id: r.get(0)?,
                name: r.get(1)?,
                year: r.get(2)?,
                subject_count: r.get(3)?,
                student_count: r.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_course(conn: &Connection, name: &str, year: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO courses(name, year) VALUES(?, ?)",
        (name.trim(), year),
    )
    .map_err(|e| NotasError::from_insert(e, "course for this year"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get_or_create_course(conn: &Connection, name: &str, year: i64) -> Result<(i64, bool)> {
    let created = conn.execute(
        "INSERT INTO courses(name, year) VALUES(?, ?) ON CONFLICT(name, year) DO NOTHING",
        (name, year),
    )? > 0;
    let id = conn.query_row(
        "SELECT id FROM courses WHERE name = ? AND year = ?",
        (name, year),
        |r| r.get(0),
    )?;
    Ok((id, created))
}

pub fn course_year(conn: &Connection, course_id: i64) -> Result<i64> {
    conn.query_row("SELECT year FROM courses WHERE id = ?", [course_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or_else(|| NotasError::NotFound("course".to_string()))
}

pub fn link_course_subject(conn: &Connection, course_id: i64, subject_id: i64) -> Result<bool> {
    Ok(conn.execute(
        "INSERT INTO course_subjects(course_id, subject_id) VALUES(?, ?)
         ON CONFLICT(course_id, subject_id) DO NOTHING",
        (course_id, subject_id),
    )? > 0)
}

pub fn link_student_course(conn: &Connection, student_id: i64, course_id: i64) -> Result<bool> {
    Ok(conn.execute(
        "INSERT INTO student_courses(student_id, course_id) VALUES(?, ?)
         ON CONFLICT(student_id, course_id) DO NOTHING",
        (student_id, course_id),
    )? > 0)
}

/// Every subject currently linked to the course, not just a caller's batch.
pub fn course_subject_ids(conn: &Connection, course_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT subject_id FROM course_subjects WHERE course_id = ? ORDER BY subject_id",
    )?;
    let ids = stmt
        .query_map([course_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn course_student_ids(conn: &Connection, course_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM student_courses WHERE course_id = ? ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map([course_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

// ---------- enrollments ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub subject_id: i64,
    pub subject_code: String,
    pub year: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrollmentFilter {
    pub student_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub year: Option<i64>,
}

pub fn list_enrollments(conn: &Connection, f: &EnrollmentFilter) -> Result<Vec<Enrollment>> {
    let mut sql = String::from(
        "SELECT e.id, e.student_id, s.last_name || ', ' || s.first_name, e.subject_id, sub.code, e.year
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN subjects sub ON sub.id = e.subject_id
         WHERE 1 = 1",
    );
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(v) = f.student_id {
        sql.push_str(" AND e.student_id = ?");
        binds.push(SqlValue::Integer(v));
    }
    if let Some(v) = f.subject_id {
        sql.push_str(" AND e.subject_id = ?");
        binds.push(SqlValue::Integer(v));
    }
    if let Some(v) = f.year {
        sql.push_str(" AND e.year = ?");
        binds.push(SqlValue::Integer(v));
    }
    sql.push_str(" ORDER BY e.year DESC, sub.code, s.last_name, s.first_name");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(Enrollment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                subject_id: r.get(3)?,
                subject_code: r.get(4)?,
                year: r.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Direct enrollment; an existing (student, subject, year) is a conflict.
pub fn insert_enrollment(conn: &Connection, student_id: i64, subject_id: i64, year: i64) -> Result<i64> {
    require(conn, Entity::Student, student_id)?;
    require(conn, Entity::Subject, subject_id)?;
    conn.execute(
        "INSERT INTO enrollments(student_id, subject_id, year) VALUES(?, ?, ?)",
        (student_id, subject_id, year),
    )
    .map_err(|e| NotasError::from_insert(e, "enrollment"))?;
    Ok(conn.last_insert_rowid())
}

/// Idempotent enrollment used by the reconciler.
pub fn ensure_enrollment(conn: &Connection, student_id: i64, subject_id: i64, year: i64) -> Result<bool> {
    Ok(conn.execute(
        "INSERT INTO enrollments(student_id, subject_id, year) VALUES(?, ?, ?)
         ON CONFLICT(student_id, subject_id, year) DO NOTHING",
        (student_id, subject_id, year),
    )? > 0)
}

// ---------- assessments ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: i64,
    pub subject_id: i64,
    pub title: String,
    pub date: Option<String>,
    pub max_score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub subject_id: i64,
    pub title: String,
    pub date: Option<String>,
    pub max_score: f64,
    pub weight: f64,
}

fn read_assessment(r: &rusqlite::Row<'_>) -> rusqlite::Result<Assessment> {
    Ok(Assessment {
        id: r.get(0)?,
        subject_id: r.get(1)?,
        title: r.get(2)?,
        date: r.get(3)?,
        max_score: r.get(4)?,
        weight: r.get(5)?,
    })
}

pub fn list_assessments(conn: &Connection, subject_id: i64) -> Result<Vec<Assessment>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, title, date, max_score, weight
         FROM assessments
         WHERE subject_id = ?
         ORDER BY date IS NULL, date, id",
    )?;
    let rows = stmt
        .query_map([subject_id], read_assessment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_assessment(conn: &Connection, id: i64) -> Result<Assessment> {
    conn.query_row(
        "SELECT id, subject_id, title, date, max_score, weight FROM assessments WHERE id = ?",
        [id],
        read_assessment,
    )
    .optional()?
    .ok_or_else(|| NotasError::NotFound("assessment".to_string()))
}

pub fn insert_assessment(conn: &Connection, a: &NewAssessment) -> Result<i64> {
    require(conn, Entity::Subject, a.subject_id)?;
    conn.execute(
        "INSERT INTO assessments(subject_id, title, date, max_score, weight) VALUES(?, ?, ?, ?, ?)",
        (a.subject_id, a.title.trim(), &a.date, a.max_score, a.weight),
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------- grades ----------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: i64,
    pub enrollment_id: i64,
    pub assessment_id: i64,
    pub student_id: i64,
    pub score: f64,
    pub max_score: f64,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GradeFilter {
    pub enrollment_id: Option<i64>,
    pub assessment_id: Option<i64>,
}

pub fn list_grades(conn: &Connection, f: &GradeFilter) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.enrollment_id, g.assessment_id, e.student_id, g.score, a.max_score, g.updated_at
         FROM grades g
         JOIN enrollments e ON e.id = g.enrollment_id
         JOIN assessments a ON a.id = g.assessment_id
         WHERE (?1 IS NULL OR g.enrollment_id = ?1)
           AND (?2 IS NULL OR g.assessment_id = ?2)
         ORDER BY g.assessment_id, e.student_id",
    )?;
    let rows = stmt
        .query_map((f.enrollment_id, f.assessment_id), |r| {
            Ok(Grade {
                id: r.get(0)?,
                enrollment_id: r.get(1)?,
                assessment_id: r.get(2)?,
                student_id: r.get(3)?,
                score: r.get(4)?,
                max_score: r.get(5)?,
                updated_at: r.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Creates or updates the single grade for (enrollment, assessment).
/// Returns the grade id and whether it was newly created.
pub fn save_grade(conn: &Connection, enrollment_id: i64, assessment_id: i64, score: f64) -> Result<(i64, bool)> {
    let enrollment_subject: i64 = conn
        .query_row(
            "SELECT subject_id FROM enrollments WHERE id = ?",
            [enrollment_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| NotasError::NotFound("enrollment".to_string()))?;
    let assessment = get_assessment(conn, assessment_id)?;
    if assessment.subject_id != enrollment_subject {
        return Err(NotasError::validation(
            "assessment and enrollment belong to different subjects",
        ));
    }
    if !score.is_finite() || score < 0.0 || score > assessment.max_score {
        return Err(NotasError::validation(format!(
            "score must be between 0 and {}",
            assessment.max_score
        )));
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM grades WHERE enrollment_id = ? AND assessment_id = ?",
            (enrollment_id, assessment_id),
            |r| r.get(0),
        )
        .optional()?;
    conn.execute(
        "INSERT INTO grades(enrollment_id, assessment_id, score, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(enrollment_id, assessment_id) DO UPDATE SET
           score = excluded.score,
           updated_at = excluded.updated_at",
        (enrollment_id, assessment_id, score, now_timestamp()),
    )?;
    match existing {
        Some(id) => Ok((id, false)),
        None => Ok((conn.last_insert_rowid(), true)),
    }
}

/// One scored assessment of a student, joined to its subject.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRow {
    pub subject_id: i64,
    pub subject_code: String,
    pub subject_name: String,
    pub score: f64,
    pub max_score: f64,
    pub weight: f64,
}

pub fn grade_rows_for_student(conn: &Connection, student_id: i64, year: i64) -> Result<Vec<GradeRow>> {
    let mut stmt = conn.prepare(
        "SELECT sub.id, sub.code, sub.name, g.score, a.max_score, a.weight
         FROM grades g
         JOIN enrollments e ON e.id = g.enrollment_id
         JOIN assessments a ON a.id = g.assessment_id
         JOIN subjects sub ON sub.id = a.subject_id
         WHERE e.student_id = ? AND e.year = ?
         ORDER BY sub.code, a.id",
    )?;
    let rows = stmt
        .query_map((student_id, year), |r| {
            Ok(GradeRow {
                subject_id: r.get(0)?,
                subject_code: r.get(1)?,
                subject_name: r.get(2)?,
                score: r.get(3)?,
                max_score: r.get(4)?,
                weight: r.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
