use axum::response::{IntoResponse, Response};
use common_auth::AuthError;
use thiserror::Error;

use crate::render;

pub const MISSING_SOURCE_ID: &str = "Missing required SourceID query parameter.";

/// Failures of a diagnostic check. Every variant is rendered as the plain-text
/// `ERROR` document with status 500; the `Display` output is the message line.
#[derive(Debug, Error)]
pub enum AutotestError {
    /// Missing or malformed client input. The rendering is a fixed external
    /// format the test harnesses match on.
    #[error("BADREQUEST('%REASON%' => '{reason}')")]
    BadRequest { reason: String },
    #[error("{0}")]
    Authentication(String),
}

impl AutotestError {
    pub fn missing_source_id() -> Self {
        AutotestError::BadRequest {
            reason: MISSING_SOURCE_ID.to_string(),
        }
    }
}

impl From<AuthError> for AutotestError {
    fn from(error: AuthError) -> Self {
        AutotestError::Authentication(error.to_string())
    }
}

impl IntoResponse for AutotestError {
    fn into_response(self) -> Response {
        render::failure(&self.to_string())
    }
}
