use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::students::try_handle,
    handlers::subjects::try_handle,
    handlers::courses::try_handle,
    handlers::enrollments::try_handle,
    handlers::assessments::try_handle,
    handlers::grades::try_handle,
    handlers::import::try_handle,
    handlers::reports::try_handle,
    handlers::backup_bundle::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!("dispatch {} ({})", req.method, req.id);
    for try_handle in HANDLERS {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
