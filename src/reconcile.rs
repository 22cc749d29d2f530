//! Bulk import of one course: upsert subjects and students, then link every
//! student to every subject of the course for the target year. The whole
//! run is one transaction; re-running the same sheets changes nothing.

use crate::error::{NotasError, Result};
use crate::sheet::{StudentRow, SubjectRow};
use crate::store::{self, NewStudent};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub students_created: usize,
    pub subjects_processed: usize,
    pub course_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub student_rows: usize,
    pub students_valid: usize,
    pub students_skipped: usize,
    pub subject_rows: usize,
    pub subjects_valid: usize,
    pub subjects_skipped: usize,
}

pub fn validate_course(course_name: &str, year: i64) -> Result<()> {
    if course_name.trim().is_empty() {
        return Err(NotasError::validation("courseName must not be empty"));
    }
    if !(1900..=2200).contains(&year) {
        return Err(NotasError::validation("year must be in 1900..=2200"));
    }
    Ok(())
}

/// Counts what `import_course` would process, without touching storage.
pub fn preview(students: &[StudentRow], subjects: &[SubjectRow]) -> ImportPreview {
    let students_valid = students.iter().filter(|s| s.has_names()).count();
    let subjects_valid = subjects.iter().filter(|s| s.is_complete()).count();
    ImportPreview {
        student_rows: students.len(),
        students_valid,
        students_skipped: students.len() - students_valid,
        subject_rows: subjects.len(),
        subjects_valid,
        subjects_skipped: subjects.len() - subjects_valid,
    }
}

pub fn import_course(
    conn: &Connection,
    course_name: &str,
    year: i64,
    students: &[StudentRow],
    subjects: &[SubjectRow],
) -> Result<ImportResult> {
    validate_course(course_name, year)?;
    let course_name = course_name.trim();

    // Dropping `tx` on any early return rolls everything back.
    let tx = conn.unchecked_transaction()?;

    let (course_id, _) = store::get_or_create_course(&tx, course_name, year)?;

    let mut subjects_processed = 0usize;
    for row in subjects {
        if !row.is_complete() {
            tracing::warn!("subjects line {}: missing code or name, skipped", row.line);
            continue;
        }
        let (subject_id, _) = store::get_or_create_subject(&tx, &row.code, &row.name)?;
        store::link_course_subject(&tx, course_id, subject_id)?;
        subjects_processed += 1;
    }

    // Everything linked to the course, including subjects from earlier imports.
    let course_subjects = store::course_subject_ids(&tx, course_id)?;

    let mut students_created = 0usize;
    let mut enrollments_created = 0usize;
    for row in students {
        if !row.has_names() {
            tracing::warn!(
                "students line {}: missing first_name or last_name, skipped",
                row.line
            );
            continue;
        }
        let student_id = match resolve_student(&tx, row)? {
            Some(id) => id,
            None => {
                students_created += 1;
                store::insert_student(
                    &tx,
                    &NewStudent {
                        run: row.run.clone(),
                        first_name: row.first_name.clone(),
                        last_name: row.last_name.clone(),
                        email: row.email.clone(),
                    },
                )?
            }
        };
        store::link_student_course(&tx, student_id, course_id)?;
        for subject_id in &course_subjects {
            if store::ensure_enrollment(&tx, student_id, *subject_id, year)? {
                enrollments_created += 1;
            }
        }
    }

    tx.commit()?;
    tracing::info!(
        "imported course {course_name}/{year}: {students_created} students created, \
         {subjects_processed} subjects processed, {enrollments_created} enrollments created"
    );
    Ok(ImportResult {
        students_created,
        subjects_processed,
        course_id,
    })
}

/// External identifier first, then case-insensitive email.
fn resolve_student(conn: &Connection, row: &StudentRow) -> Result<Option<i64>> {
    if let Some(run) = row.run.as_deref() {
        if let Some(id) = store::find_student_by_run(conn, run)? {
            return Ok(Some(id));
        }
    }
    if let Some(email) = row.email.as_deref() {
        return store::find_student_by_email(conn, email);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .expect("count")
    }

    fn st(line: usize, run: Option<&str>, first: &str, last: &str, email: Option<&str>) -> StudentRow {
        StudentRow {
            line,
            run: run.map(str::to_string),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.map(str::to_string),
        }
    }

    fn sub(line: usize, code: &str, name: &str) -> SubjectRow {
        SubjectRow {
            line,
            code: code.to_string(),
            name: name.to_string(),
        }
    }

    fn sample() -> (Vec<StudentRow>, Vec<SubjectRow>) {
        (
            vec![
                st(2, Some("11.111.111-1"), "Ana", "Rojas", None),
                st(3, None, "Luis", "Soto", Some("luis@colegio.cl")),
            ],
            vec![sub(2, "MAT", "Matemática"), sub(3, "LEN", "Lenguaje")],
        )
    }

    #[test]
    fn seventh_grade_import_creates_full_link_set() {
        let conn = mem();
        let (students, subjects) = sample();
        let res = import_course(&conn, "7B", 2025, &students, &subjects).expect("import");
        assert_eq!(res.students_created, 2);
        assert_eq!(res.subjects_processed, 2);

        assert_eq!(count(&conn, "students"), 2);
        assert_eq!(count(&conn, "subjects"), 2);
        assert_eq!(count(&conn, "courses"), 1);
        assert_eq!(count(&conn, "course_subjects"), 2);
        assert_eq!(count(&conn, "student_courses"), 2);
        assert_eq!(count(&conn, "enrollments"), 4);

        let years: Vec<i64> = conn
            .prepare("SELECT DISTINCT year FROM enrollments")
            .expect("prepare")
            .query_map([], |r| r.get(0))
            .expect("query")
            .collect::<std::result::Result<_, _>>()
            .expect("rows");
        assert_eq!(years, vec![2025]);
    }

    #[test]
    fn reimport_adds_nothing_but_still_counts_subject_rows() {
        let conn = mem();
        let (students, subjects) = sample();
        let first = import_course(&conn, "7B", 2025, &students, &subjects).expect("first");
        let second = import_course(&conn, "7B", 2025, &students, &subjects).expect("second");

        assert_eq!(second.students_created, 0);
        assert_eq!(second.subjects_processed, 2);
        assert_eq!(second.course_id, first.course_id);
        assert_eq!(count(&conn, "students"), 2);
        assert_eq!(count(&conn, "course_subjects"), 2);
        assert_eq!(count(&conn, "student_courses"), 2);
        assert_eq!(count(&conn, "enrollments"), 4);
    }

    #[test]
    fn student_without_last_name_is_skipped_alone() {
        let conn = mem();
        let students = vec![
            st(2, Some("1-9"), "Ana", "Rojas", None),
            st(3, Some("2-7"), "Luis", "", None),
        ];
        let subjects = vec![sub(2, "MAT", "Matemática")];
        let res = import_course(&conn, "7B", 2025, &students, &subjects).expect("import");
        assert_eq!(res.students_created, 1);
        assert_eq!(count(&conn, "students"), 1);
        assert_eq!(count(&conn, "student_courses"), 1);
        assert_eq!(count(&conn, "enrollments"), 1);
        assert!(store::find_student_by_run(&conn, "2-7").expect("find").is_none());
    }

    #[test]
    fn incomplete_subject_rows_are_not_processed() {
        let conn = mem();
        let subjects = vec![sub(2, "MAT", "Matemática"), sub(3, "", "Sin código")];
        let res = import_course(&conn, "7B", 2025, &[], &subjects).expect("import");
        assert_eq!(res.subjects_processed, 1);
        assert_eq!(count(&conn, "subjects"), 1);
    }

    #[test]
    fn students_resolve_by_run_then_email() {
        let conn = mem();
        let (students, subjects) = sample();
        import_course(&conn, "7B", 2025, &students, &subjects).expect("first");

        // Same people, formatted differently, in a new course.
        let again = vec![
            st(2, Some("11111111-1"), "Ana", "Rojas", None),
            st(3, None, "Luis", "Soto", Some("LUIS@Colegio.cl")),
        ];
        let res = import_course(&conn, "8A", 2026, &again, &subjects).expect("second");
        assert_eq!(res.students_created, 0);
        assert_eq!(count(&conn, "students"), 2);
        assert_eq!(count(&conn, "student_courses"), 4);
        assert_eq!(count(&conn, "enrollments"), 8);
    }

    #[test]
    fn duplicate_rows_in_one_batch_create_one_student() {
        let conn = mem();
        let students = vec![
            st(2, Some("12.345.678-k"), "Ana", "Rojas", None),
            st(3, Some("12345678-K"), "Ana", "Rojas", None),
        ];
        let res = import_course(&conn, "7B", 2025, &students, &[]).expect("import");
        assert_eq!(res.students_created, 1);
        assert_eq!(count(&conn, "students"), 1);
    }

    #[test]
    fn later_subjects_reach_students_from_earlier_imports() {
        let conn = mem();
        let (students, _) = sample();
        import_course(&conn, "7B", 2025, &students, &[sub(2, "MAT", "Matemática")])
            .expect("first");
        assert_eq!(count(&conn, "enrollments"), 2);

        import_course(&conn, "7B", 2025, &students, &[sub(2, "HIS", "Historia")])
            .expect("second");
        assert_eq!(count(&conn, "course_subjects"), 2);
        assert_eq!(count(&conn, "enrollments"), 4);
    }

    #[test]
    fn storage_failure_rolls_back_whole_import() {
        let conn = mem();
        conn.execute_batch(
            "CREATE TRIGGER fail_on_boom BEFORE INSERT ON students
             WHEN NEW.first_name = 'Boom'
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .expect("trigger");

        let students = vec![
            st(2, Some("1-9"), "Ana", "Rojas", None),
            st(3, Some("2-7"), "Boom", "Falla", None),
        ];
        let subjects = vec![sub(2, "MAT", "Matemática")];
        let e = import_course(&conn, "7B", 2025, &students, &subjects).expect_err("abort");
        assert_eq!(e.code(), "db_error");

        for table in [
            "students",
            "subjects",
            "courses",
            "course_subjects",
            "student_courses",
            "enrollments",
        ] {
            assert_eq!(count(&conn, table), 0, "{table} should be empty");
        }
    }

    #[test]
    fn invalid_course_is_rejected_before_storage() {
        let conn = mem();
        let e = import_course(&conn, "  ", 2025, &[], &[]).expect_err("empty name");
        assert_eq!(e.code(), "bad_params");
        let e = import_course(&conn, "7B", 25, &[], &[]).expect_err("bad year");
        assert_eq!(e.code(), "bad_params");
        assert_eq!(count(&conn, "courses"), 0);
    }

    #[test]
    fn preview_counts_valid_and_skipped_rows() {
        let students = vec![
            st(2, None, "Ana", "Rojas", None),
            st(3, None, "", "Soto", None),
        ];
        let subjects = vec![sub(2, "MAT", "Matemática")];
        let p = preview(&students, &subjects);
        assert_eq!(p.students_valid, 1);
        assert_eq!(p.students_skipped, 1);
        assert_eq!(p.subjects_valid, 1);
        assert_eq!(p.subjects_skipped, 0);
    }
}
