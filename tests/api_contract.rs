#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! API Contract Tests
//!
//! Relay controllers in the field (home automation scripts, cron jobs) call
//! these paths directly, so a renamed route breaks them silently. The golden
//! file at tests/fixtures/api_routes.txt lists every route; each one is sent
//! through the live router against a seeded registry.
//!
//! If this test fails:
//! 1. Review the route changes carefully
//! 2. Update api_routes.txt if the change is intentional
//!
//! Run with: cargo test --test api_contract

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use pi_relay::api::{self, AppState};
use pi_relay::gpio::MockPinDriver;
use pi_relay::relay::{RelayRegistry, RelaySpec};

const METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Golden routes as `(method, path)`, in file order
fn load_golden_routes() -> Vec<(Method, String)> {
    let content =
        fs::read_to_string("tests/fixtures/api_routes.txt").expect("Failed to read api_routes.txt");

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .map(|line| {
            let (method, path) = line
                .split_once(' ')
                .unwrap_or_else(|| panic!("malformed route line: {}", line));
            (method.parse().unwrap(), path.to_string())
        })
        .collect()
}

/// Router over a registry holding relay `porch` on gpio 17
async fn seeded_app() -> Router {
    let registry = RelayRegistry::new(Arc::new(MockPinDriver::new()), CancellationToken::new());
    registry.create(RelaySpec::new("porch", 17)).await.unwrap();
    api::router(AppState::new(registry))
}

/// A valid request body for each route that takes one
fn body_for(method: &Method, path: &str) -> Option<&'static str> {
    match (method.as_str(), path) {
        ("POST", "/api/v1/gpio") => Some(r#"{"id": "garden", "gpio": 27}"#),
        ("PUT", "/api/v1/gpio/{id}") => Some(r#"{"state": true}"#),
        ("PUT", "/api/v1/state") => Some(r#"{"id": "porch", "state": true}"#),
        _ => None,
    }
}

async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[test]
fn golden_file_is_sorted_and_unique() {
    let lines: Vec<String> = load_golden_routes()
        .into_iter()
        .map(|(method, path)| format!("{} {}", method, path))
        .collect();
    let sorted: Vec<String> = lines.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    assert_eq!(lines, sorted, "api_routes.txt must be sorted without duplicates");
}

#[tokio::test]
async fn every_golden_route_is_served() {
    let mut failures = Vec::new();

    for (method, path) in load_golden_routes() {
        let uri = path.replace("{id}", "porch");
        let body = body_for(&method, &path);
        let (status, text) = send(seeded_app().await, method.clone(), &uri, body).await;
        if !status.is_success() {
            failures.push(format!("{} {} -> {} {}", method, uri, status, text));
        }
    }

    if !failures.is_empty() {
        panic!(
            "\n\nGolden routes not served by the router:\n{}\n\n\
             Either restore the route or update tests/fixtures/api_routes.txt.\n",
            failures.join("\n")
        );
    }
}

#[tokio::test]
async fn methods_outside_the_contract_are_rejected() {
    let mut allowed: BTreeMap<String, Vec<Method>> = BTreeMap::new();
    for (method, path) in load_golden_routes() {
        allowed.entry(path).or_default().push(method);
    }

    for (path, methods) in &allowed {
        let uri = path.replace("{id}", "porch");
        for method in METHODS.iter().filter(|m| !methods.contains(m)) {
            let (status, _) = send(seeded_app().await, method.clone(), &uri, None).await;
            assert_eq!(
                status,
                StatusCode::METHOD_NOT_ALLOWED,
                "{} {} is not in api_routes.txt but was routed",
                method,
                uri
            );
        }
    }
}

#[tokio::test]
async fn paths_outside_the_contract_are_not_found() {
    for uri in ["/api/v1/relays", "/api/v2/gpio", "/api/v1/gpio/porch/state"] {
        let (status, body) = send(seeded_app().await, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} was routed", uri);
        // The router's own 404, not the relay-not-found envelope
        assert!(body.is_empty(), "{} answered {}", uri, body);
    }
}
