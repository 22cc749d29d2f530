use crate::config::Config;
use crate::ipc::error::{err, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{get_required_i64, get_year, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::Connection;
use serde_json::{json, Value};

fn reports_student(conn: &Connection, config: &Config, params: &Value) -> HandlerResult {
    let student_id = get_required_i64(params, "studentId")?;
    let year = get_year(params)?;
    let scale = setup::requested_scale(conn, config, params.get("scale"))
        .map_err(HandlerErr::bad_params)?;

    let report = report::student_report(conn, student_id, year, &scale)?;
    Ok(json!({
        "studentId": student_id,
        "year": year,
        "scale": scale,
        "perSubject": report.per_subject,
        "failures": report.failures,
        "overallGrade": report.overall_grade,
        "hasGrades": report.has_grades
    }))
}

fn handle_reports_student(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, reports_student(conn, &state.config, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "reports.student" => Some(handle_reports_student(state, req)),
        _ => None,
    }
}
