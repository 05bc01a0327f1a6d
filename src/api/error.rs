//! Error responses
//!
//! Every failure is returned in the same envelope as successes, with an
//! `error` message in place of `result`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use super::envelope::timestamp;
use crate::relay::RelayError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Body is not JSON or is missing a required field
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Some relays in a batch could not be driven
    #[error("{} relay(s) failed: {}", .0.len(), join_errors(.0))]
    Partial(Vec<RelayError>),
}

fn join_errors(errors: &[RelayError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    date: String,
    error: String,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_)
            | ApiError::Relay(RelayError::InvalidDurationFormat { .. })
            | ApiError::Relay(RelayError::InvalidSpec(_)) => {
                (StatusCode::BAD_REQUEST, "Error on Request Body")
            }
            ApiError::Relay(RelayError::NotFound(_)) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::Relay(RelayError::DuplicateId(_))
            | ApiError::Relay(RelayError::PinInUse { .. }) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::Relay(RelayError::HardwareError { .. }) | ApiError::Partial(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Hardware Error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.status();
        if code.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", code, self);
        }

        let body = ErrorEnvelope {
            status,
            date: timestamp(),
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
