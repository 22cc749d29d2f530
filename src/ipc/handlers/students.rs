use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_str, get_required_i64, get_required_str, with_db, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Entity, NewStudent};
use rusqlite::Connection;
use serde_json::{json, Value};

fn read_student(params: &Value) -> Result<NewStudent, crate::ipc::error::HandlerErr> {
    Ok(NewStudent {
        run: get_optional_str(params, "run")?,
        first_name: get_required_str(params, "firstName")?,
        last_name: get_required_str(params, "lastName")?,
        email: get_optional_str(params, "email")?,
    })
}

fn students_create(conn: &Connection, params: &Value) -> HandlerResult {
    let student = read_student(params)?;
    let id = store::insert_student(conn, &student)?;
    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "studentId")?;
    let student = read_student(params)?;
    store::update_student(conn, id, &student)?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "studentId")?;
    store::delete(conn, Entity::Student, id)?;
    tracing::info!("deleted student {id}");
    Ok(json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "students": [] }));
    }
    with_db(state, req, |conn, _| {
        Ok(json!({ "students": store::list_students(conn)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
