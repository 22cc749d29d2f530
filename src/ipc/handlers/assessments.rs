use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_optional_f64, get_optional_str, get_required_i64, get_required_str, with_db,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Entity, NewAssessment};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

const DEFAULT_MAX_SCORE: f64 = 100.0;
const DEFAULT_WEIGHT: f64 = 1.0;

fn parse_date(params: &Value) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, "date")? else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn assessments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let subject_id = get_required_i64(params, "subjectId")?;
    let title = get_required_str(params, "title")?;
    let date = parse_date(params)?;
    let max_score = get_optional_f64(params, "maxScore")?.unwrap_or(DEFAULT_MAX_SCORE);
    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be > 0"));
    }
    let weight = get_optional_f64(params, "weight")?.unwrap_or(DEFAULT_WEIGHT);
    if weight < 0.0 {
        return Err(HandlerErr::bad_params("weight must be >= 0"));
    }

    let id = store::insert_assessment(
        conn,
        &NewAssessment {
            subject_id,
            title,
            date,
            max_score,
            weight,
        },
    )?;
    Ok(json!({ "assessmentId": id, "maxScore": max_score, "weight": weight }))
}

fn assessments_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "assessmentId")?;
    store::delete(conn, Entity::Assessment, id)?;
    tracing::info!("deleted assessment {id}");
    Ok(json!({ "ok": true }))
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "assessments": [] }));
    }
    with_db(state, req, |conn, params| {
        let subject_id = get_required_i64(params, "subjectId")?;
        Ok(json!({ "assessments": store::list_assessments(conn, subject_id)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "assessments.list" => Some(handle_assessments_list(state, req)),
        "assessments.create" => Some(with_db(state, req, assessments_create)),
        "assessments.delete" => Some(with_db(state, req, assessments_delete)),
        _ => None,
    }
}
