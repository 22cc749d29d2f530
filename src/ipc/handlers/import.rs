use crate::ipc::error::{err, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{get_optional_str, get_required_str, get_year, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::sheet::{self, StudentRow, SubjectRow, Table};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Reads one sheet from `<name>Path` (CSV file) or inline `<name>` (JSON table).
fn read_table(params: &Value, name: &str) -> Result<Table, HandlerErr> {
    let path_key = format!("{name}Path");
    if let Some(path) = get_optional_str(params, &path_key)? {
        let text = std::fs::read_to_string(&path).map_err(|e| HandlerErr {
            code: "io_failed",
            message: format!("failed to read {name} sheet: {e}"),
            details: Some(json!({ "path": path })),
        })?;
        return Ok(Table::from_csv(&text));
    }
    match params.get(name) {
        None | Some(Value::Null) => Err(HandlerErr::bad_params(format!(
            "missing {name} or {path_key}"
        ))),
        Some(v) => Ok(Table::from_json(v, name)?),
    }
}

fn check_row_limit(table: &Table, name: &str, max_rows: usize) -> Result<(), HandlerErr> {
    if table.rows.len() > max_rows {
        return Err(HandlerErr::bad_params(format!(
            "{name} sheet has {} rows, limit is {max_rows}",
            table.rows.len()
        ))
        .with_details(json!({ "rows": table.rows.len(), "maxRows": max_rows })));
    }
    Ok(())
}

struct ImportInput {
    course_name: String,
    year: i64,
    students: Vec<StudentRow>,
    subjects: Vec<SubjectRow>,
}

/// Everything is parsed and checked here, before any storage mutation.
fn read_input(params: &Value, max_rows: usize) -> Result<ImportInput, HandlerErr> {
    let course_name = get_required_str(params, "courseName")?;
    let year = get_year(params)?;
    let students = read_table(params, "students")?;
    let subjects = read_table(params, "subjects")?;
    check_row_limit(&students, "students", max_rows)?;
    check_row_limit(&subjects, "subjects", max_rows)?;
    Ok(ImportInput {
        course_name,
        year,
        students: sheet::student_rows(&students)?,
        subjects: sheet::subject_rows(&subjects)?,
    })
}

fn run_import(conn: &Connection, params: &Value, max_rows: usize, apply: bool) -> HandlerResult {
    let input = read_input(params, max_rows)?;
    if !apply {
        let preview = reconcile::preview(&input.students, &input.subjects);
        return Ok(json!({
            "courseName": input.course_name,
            "year": input.year,
            "preview": preview
        }));
    }
    let res = reconcile::import_course(
        conn,
        &input.course_name,
        input.year,
        &input.students,
        &input.subjects,
    )?;
    Ok(json!({
        "studentsCreated": res.students_created,
        "subjectsProcessed": res.subjects_processed,
        "courseId": res.course_id
    }))
}

fn handle_import(state: &mut AppState, req: &Request, apply: bool) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let max_rows = match setup::effective_max_rows(conn, &state.config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };
    respond(req, run_import(conn, &req.params, max_rows, apply))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "import.preview" => Some(handle_import(state, req, false)),
        "import.course" => Some(handle_import(state, req, true)),
        _ => None,
    }
}
