//! Centralized error type for the translation pipeline.
//!
//! Every error kind named in the error-handling design collapses into a single
//! [`PipelineError`] enum with a stable [`ErrorCode::code`] string, so the same
//! value can drive a WebSocket close frame, an `{type:"error"}` application
//! frame, an HTTP response body, and a log record.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Trait implemented by every error type that can be surfaced to a client
/// with a stable machine-readable code.
pub trait ErrorCode {
    /// Returns the stable error code string for API/WS responses.
    fn code(&self) -> &'static str;
}

/// The nine error kinds of the control plane and translation pipeline.
///
/// Kinds 1-3 and 6-8 are locally recovered and never terminate a connection;
/// kinds 4-5 close the connection at accept/join time; kind 9 is
/// process-terminating.
#[derive(Debug, thiserror::Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PipelineError {
    /// Malformed frame or unrecognized action. Replied to with an `error`
    /// frame; the connection stays open.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Signature/claims invalid. Never rejects outright; callers downgrade
    /// to an anonymous principal instead of surfacing this to the client.
    #[error("auth error: {0}")]
    AuthError(String),

    /// Role policy failed (speaker not owner, policy violation).
    #[error("authorization error: {0}")]
    AuthzError(String),

    /// Session missing or ended.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad language pair or missing required parameter.
    #[error("validation error: {0}")]
    Validation(String),

    /// STT/MT/TTS/blob/presign exceeded its budget.
    #[error("upstream timeout in {stage}: {detail}")]
    UpstreamTimeout { stage: &'static str, detail: String },

    /// A send to a connection failed; the connection is considered gone.
    #[error("gone connection: {0}")]
    GoneConnection(String),

    /// Back-pressure caused frames to be dropped.
    #[error("overload: {0}")]
    Overload(String),

    /// Store unavailable, scheduler stopped; supervisor must shut down.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProtocolError(_) => "protocol_error",
            Self::AuthError(_) => "auth_error",
            Self::AuthzError(_) => "authz_error",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::GoneConnection(_) => "gone_connection",
            Self::Overload(_) => "overload",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl PipelineError {
    /// HTTP status used for the admin surface (`/health`, `/ready`) and any
    /// synchronous REST-style error response.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProtocolError(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthError(_) | Self::AuthzError(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::GoneConnection(_) => StatusCode::GONE,
            Self::Overload(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// WebSocket close code for the kinds that terminate a connection
    /// (`NotFound` -> 4004, `Validation`/policy -> 4000/4001/1008).
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 4004,
            Self::Validation(_) => 4000,
            Self::AuthzError(_) => 4001,
            Self::Fatal(_) => 1011,
            _ => 1000,
        }
    }
}

/// JSON body shape for HTTP error responses.
#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Runs `fut` under a `duration` deadline, folding both a timeout and the
/// future's own error into [`PipelineError::UpstreamTimeout`] (the latter via
/// each port error's `From` impl), so call sites can use `?` instead of a
/// manual three-arm match on `Ok(Ok(_))`/`Ok(Err(_))`/`Err(_)`.
pub async fn with_timeout<T, E>(
    duration: std::time::Duration,
    stage: &'static str,
    fut: impl std::future::Future<Output = Result<T, E>>,
) -> PipelineResult<T>
where
    E: Into<PipelineError>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PipelineError::UpstreamTimeout {
            stage,
            detail: "timed out".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_4004_and_404() {
        let err = PipelineError::NotFound("session gone".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.close_code(), 4004);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_maps_to_4000() {
        let err = PipelineError::Validation("bad target".into());
        assert_eq!(err.close_code(), 4000);
    }

    #[test]
    fn fatal_maps_to_1011() {
        let err = PipelineError::Fatal("store down".into());
        assert_eq!(err.close_code(), 1011);
    }
}
