use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_i64, get_required_str, with_db, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Entity};
use rusqlite::Connection;
use serde_json::{json, Value};

fn subjects_create(conn: &Connection, params: &Value) -> HandlerResult {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let id = store::insert_subject(conn, &code, &name)?;
    Ok(json!({ "subjectId": id, "code": code, "name": name }))
}

fn subjects_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "subjectId")?;
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    store::update_subject(conn, id, &code, &name)?;
    Ok(json!({ "ok": true }))
}

fn subjects_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "subjectId")?;
    store::delete(conn, Entity::Subject, id)?;
    tracing::info!("deleted subject {id}");
    Ok(json!({ "ok": true }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "subjects": [] }));
    }
    with_db(state, req, |conn, _| {
        Ok(json!({ "subjects": store::list_subjects(conn)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(with_db(state, req, subjects_create)),
        "subjects.update" => Some(with_db(state, req, subjects_update)),
        "subjects.delete" => Some(with_db(state, req, subjects_delete)),
        _ => None,
    }
}
