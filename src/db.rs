use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "notas.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            created_at TEXT
        )",
        [],
    )?;
    // Older workspaces only carry (id, name, created_at).
    ensure_students_split_name(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_run ON students(run)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(lower(email))",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            year INTEGER NOT NULL,
            UNIQUE(name, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(course_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_subjects_subject ON course_subjects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_courses(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE,
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_course ON student_courses(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            UNIQUE(student_id, subject_id, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_subject_year ON enrollments(subject_id, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            date TEXT,
            max_score REAL NOT NULL DEFAULT 100,
            weight REAL NOT NULL DEFAULT 1.0,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_subject ON assessments(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            enrollment_id INTEGER NOT NULL,
            assessment_id INTEGER NOT NULL,
            score REAL NOT NULL CHECK(score >= 0),
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE,
            FOREIGN KEY(assessment_id) REFERENCES assessments(id) ON DELETE CASCADE,
            UNIQUE(enrollment_id, assessment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_assessment ON grades(assessment_id)",
        [],
    )?;

    // A grade's enrollment and assessment must point at the same subject.
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grades_subject_insert
         BEFORE INSERT ON grades
         WHEN (SELECT subject_id FROM enrollments WHERE id = NEW.enrollment_id)
              IS NOT (SELECT subject_id FROM assessments WHERE id = NEW.assessment_id)
         BEGIN
           SELECT RAISE(ABORT, 'grade enrollment and assessment belong to different subjects');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grades_subject_update
         BEFORE UPDATE OF enrollment_id, assessment_id ON grades
         WHEN (SELECT subject_id FROM enrollments WHERE id = NEW.enrollment_id)
              IS NOT (SELECT subject_id FROM assessments WHERE id = NEW.assessment_id)
         BEGIN
           SELECT RAISE(ABORT, 'grade enrollment and assessment belong to different subjects');
         END",
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

fn ensure_students_split_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "first_name")? {
        return Ok(());
    }

    conn.execute("ALTER TABLE students ADD COLUMN run TEXT", [])?;
    conn.execute(
        "ALTER TABLE students ADD COLUMN first_name TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute(
        "ALTER TABLE students ADD COLUMN last_name TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute("ALTER TABLE students ADD COLUMN email TEXT", [])?;
    if !table_has_column(conn, "students", "created_at")? {
        conn.execute("ALTER TABLE students ADD COLUMN created_at TEXT", [])?;
    }

    if !table_has_column(conn, "students", "name")? {
        return Ok(());
    }

    // Backfill: first word is the given name, the rest the surnames.
    let mut stmt = conn.prepare("SELECT id, COALESCE(name, '') FROM students ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, name) in rows {
        let name = name.trim();
        let (first, last) = match name.split_once(char::is_whitespace) {
            Some((f, l)) => (f, l.trim()),
            None => (name, ""),
        };
        conn.execute(
            "UPDATE students SET first_name = ?, last_name = ? WHERE id = ?",
            (first, last, id),
        )?;
    }
    tracing::info!("migrated legacy students table to split names");
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
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
