//! Response envelope and request body parsing

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ApiError;

/// `{"status": ..., "date": ..., "result": ...}`
#[derive(Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub date: String,
    pub result: T,
}

/// Current time as sent in the `date` field
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn respond<T: Serialize>(code: StatusCode, status: &'static str, result: T) -> Response {
    let body = Envelope {
        status,
        date: timestamp(),
        result,
    };
    (code, Json(body)).into_response()
}

/// A body holding either one object or an array of them
#[derive(Debug)]
pub enum Payload<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Payload<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Payload::One(item) => vec![item],
            Payload::Many(items) => items,
        }
    }
}

/// Decide single vs. batch by the first non-whitespace byte, then parse.
pub fn parse_payload<T: DeserializeOwned>(body: &[u8]) -> Result<Payload<T>, ApiError> {
    let first = body.iter().find(|b| !b.is_ascii_whitespace());
    let parsed = match first {
        None => return Err(ApiError::BadRequest("empty request body".to_string())),
        Some(b'[') => serde_json::from_slice(body).map(Payload::Many),
        Some(_) => serde_json::from_slice(body).map(Payload::One),
    };
    parsed.map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

/// Parse a body that must be a single object
pub fn parse_one<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    match parse_payload(body)? {
        Payload::One(item) => Ok(item),
        Payload::Many(_) => Err(ApiError::BadRequest(
            "expected a single object, got an array".to_string(),
        )),
    }
}
