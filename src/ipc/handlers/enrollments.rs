use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_i64, get_required_i64, get_year, with_db, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, EnrollmentFilter, Entity};
use rusqlite::Connection;
use serde_json::{json, Value};

fn enrollments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_i64(params, "studentId")?;
    let subject_id = get_required_i64(params, "subjectId")?;
    let year = get_year(params)?;
    let id = store::insert_enrollment(conn, student_id, subject_id, year)?;
    Ok(json!({ "enrollmentId": id }))
}

fn enrollments_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "enrollmentId")?;
    store::delete(conn, Entity::Enrollment, id)?;
    tracing::info!("deleted enrollment {id}");
    Ok(json!({ "ok": true }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "enrollments": [] }));
    }
    with_db(state, req, |conn, params| {
        let filter = EnrollmentFilter {
            student_id: get_optional_i64(params, "studentId")?,
            subject_id: get_optional_i64(params, "subjectId")?,
            year: get_optional_i64(params, "year")?,
        };
        Ok(json!({ "enrollments": store::list_enrollments(conn, &filter)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.create" => Some(with_db(state, req, enrollments_create)),
        "enrollments.delete" => Some(with_db(state, req, enrollments_delete)),
        _ => None,
    }
}
