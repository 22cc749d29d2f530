use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_i64, get_required_f64, get_required_i64, with_db, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Entity, GradeFilter};
use rusqlite::Connection;
use serde_json::{json, Value};

fn grades_save(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = get_required_i64(params, "enrollmentId")?;
    let assessment_id = get_required_i64(params, "assessmentId")?;
    let score = get_required_f64(params, "score")?;
    let (id, created) = store::save_grade(conn, enrollment_id, assessment_id, score)?;
    Ok(json!({ "gradeId": id, "created": created }))
}

fn grades_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "gradeId")?;
    store::delete(conn, Entity::Grade, id)?;
    Ok(json!({ "ok": true }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "grades": [] }));
    }
    with_db(state, req, |conn, params| {
        let filter = GradeFilter {
            enrollment_id: get_optional_i64(params, "enrollmentId")?,
            assessment_id: get_optional_i64(params, "assessmentId")?,
        };
        Ok(json!({ "grades": store::list_grades(conn, &filter)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.save" => Some(with_db(state, req, grades_save)),
        "grades.delete" => Some(with_db(state, req, grades_delete)),
        _ => None,
    }
}
