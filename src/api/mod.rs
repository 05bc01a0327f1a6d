//! HTTP API handlers

mod envelope;
mod error;

pub use envelope::{parse_one, parse_payload, respond, timestamp, Envelope, Payload};
pub use error::ApiError;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::relay::{RelayError, RelayRegistry, RelaySpec, ToggleSpec};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: RelayRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: RelayRegistry) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/status", get(status_handler))
        .route("/api/v1/gpio", post(create_relays_handler))
        .route("/api/v1/gpio", get(list_relays_handler))
        .route("/api/v1/gpio/{id}", get(get_relay_handler))
        .route("/api/v1/gpio/{id}", put(update_relay_handler))
        .route("/api/v1/gpio/{id}", delete(delete_relay_handler))
        .route("/api/v1/state", put(change_state_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub driver: &'static str,
    pub relays: usize,
    pub active: usize,
    pub pending_reverts: usize,
}

/// GET / - Service banner
pub async fn home_handler() -> &'static str {
    "pi-relay: GPIO relay control. Relays live under /api/v1/gpio, bulk state changes at /api/v1/state."
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.registry.stats().await;

    Json(StatusResponse {
        service: "pi-relay",
        version: env!("PI_RELAY_VERSION"),
        git_sha: env!("PI_RELAY_GIT_SHA"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        driver: state.registry.driver_name(),
        relays: stats.relays,
        active: stats.active,
        pending_reverts: stats.pending_reverts,
    })
}

// =============================================================================
// Relay handlers
// =============================================================================

/// POST /api/v1/gpio - Register one relay or an array of relays
pub async fn create_relays_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    match parse_payload::<RelaySpec>(&body)? {
        Payload::One(spec) => {
            let record = state.registry.create(spec).await?;
            Ok(respond(StatusCode::CREATED, "Created", record))
        }
        Payload::Many(specs) => {
            let outcome = state.registry.create_batch(specs).await?;
            if !outcome.failures.is_empty() {
                return Err(ApiError::Partial(outcome.failures));
            }
            Ok(respond(StatusCode::CREATED, "Created", outcome.records))
        }
    }
}

/// GET /api/v1/gpio - List relays in registration order
pub async fn list_relays_handler(State(state): State<AppState>) -> Response {
    let records = state.registry.list().await;
    respond(StatusCode::OK, "Success", records)
}

/// GET /api/v1/gpio/{id} - Get one relay
pub async fn get_relay_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state.registry.get(&id).await?;
    Ok(respond(StatusCode::OK, "Success", record))
}

/// PUT /api/v1/gpio/{id} - Change one relay's state
pub async fn update_relay_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let spec: ToggleSpec = parse_one(&body)?;
    let record = state.registry.update(&id, &spec).await?;
    Ok(respond(StatusCode::OK, "Updated", record))
}

/// DELETE /api/v1/gpio/{id} - Remove a relay, cancelling its pending revert
pub async fn delete_relay_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state.registry.delete(&id).await?;
    Ok(respond(StatusCode::OK, "Deleted", record))
}

/// PUT /api/v1/state - Change state of relays named in the body
///
/// One match responds with the record itself, several with an array.
pub async fn change_state_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let specs = parse_payload::<ToggleSpec>(&body)?.into_vec();
    let mut outcome = state.registry.update_batch(&specs).await?;

    if outcome.matched == 0 {
        return Err(RelayError::NotFound(requested_ids(&specs)).into());
    }
    if !outcome.failures.is_empty() {
        return Err(ApiError::Partial(outcome.failures));
    }

    if outcome.records.len() == 1 {
        if let Some(record) = outcome.records.pop() {
            return Ok(respond(StatusCode::OK, "Updated", record));
        }
    }
    Ok(respond(StatusCode::OK, "Updated", outcome.records))
}

fn requested_ids(specs: &[ToggleSpec]) -> String {
    specs
        .iter()
        .filter_map(|s| s.id.as_deref())
        .collect::<Vec<_>>()
        .join(", ")
}
