//! Small JSON response helpers shared by the admin/session HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Wraps `body` as a `200 OK` JSON response.
pub fn api_ok<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// Wraps `body` with an explicit status code as a JSON response, for success
/// responses that aren't `200` (e.g. `201 Created`).
pub fn api_success<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}
