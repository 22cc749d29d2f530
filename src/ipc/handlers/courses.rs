use crate::error::NotasError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_i64, get_required_i64, get_required_str, get_year, with_db, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Entity};
use rusqlite::Connection;
use serde_json::{json, Value};

fn courses_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let year = get_year(params)?;
    let id = store::insert_course(conn, &name, year)?;
    Ok(json!({ "courseId": id, "name": name, "year": year }))
}

fn courses_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = get_required_i64(params, "courseId")?;
    store::delete(conn, Entity::Course, id)?;
    tracing::info!("deleted course {id}");
    Ok(json!({ "ok": true }))
}

/// Links a subject and enrolls the course's current students in it for the
/// course year.
fn courses_add_subject(conn: &Connection, params: &Value) -> HandlerResult {
    let course_id = get_required_i64(params, "courseId")?;
    let subject_id = get_required_i64(params, "subjectId")?;
    let year = store::course_year(conn, course_id)?;
    store::require(conn, Entity::Subject, subject_id)?;

    let tx = conn.unchecked_transaction().map_err(NotasError::from)?;
    let linked = store::link_course_subject(&tx, course_id, subject_id)?;
    let mut enrollments_created = 0usize;
    for student_id in store::course_student_ids(&tx, course_id)? {
        if store::ensure_enrollment(&tx, student_id, subject_id, year)? {
            enrollments_created += 1;
        }
    }
    tx.commit().map_err(NotasError::from)?;
    Ok(json!({ "linked": linked, "enrollmentsCreated": enrollments_created }))
}

/// Links a student and enrolls them in every subject of the course.
fn courses_add_student(conn: &Connection, params: &Value) -> HandlerResult {
    let course_id = get_required_i64(params, "courseId")?;
    let student_id = get_required_i64(params, "studentId")?;
    let year = store::course_year(conn, course_id)?;
    store::require(conn, Entity::Student, student_id)?;

    let tx = conn.unchecked_transaction().map_err(NotasError::from)?;
    let linked = store::link_student_course(&tx, student_id, course_id)?;
    let mut enrollments_created = 0usize;
    for subject_id in store::course_subject_ids(&tx, course_id)? {
        if store::ensure_enrollment(&tx, student_id, subject_id, year)? {
            enrollments_created += 1;
        }
    }
    tx.commit().map_err(NotasError::from)?;
    Ok(json!({ "linked": linked, "enrollmentsCreated": enrollments_created }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "courses": [] }));
    }
    with_db(state, req, |conn, params| {
        let year = get_optional_i64(params, "year")?;
        Ok(json!({ "courses": store::list_courses(conn, year)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.delete" => Some(with_db(state, req, courses_delete)),
        "courses.addSubject" => Some(with_db(state, req, courses_add_subject)),
        "courses.addStudent" => Some(with_db(state, req, courses_add_student)),
        _ => None,
    }
}
