//! HTTP surface tests against in-process backends
//!
//! Requests go straight into the router, no listener involved.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use itemgate::cache::CacheConfig;
use itemgate::channel::CommandChannel;
use itemgate::server::{handle_request, BoxBody};
use itemgate::types::Item;
use itemgate::worker::{CommandProcessor, ProcessorConfig};
use itemgate::{AppState, Args, Backends};
use serde_json::Value;

fn dev_state() -> (Arc<AppState>, Backends) {
    let args = Args::parse_from(["itemgate", "--dev-mode", "--jwt-secret", "test-secret"]);
    let backends = Backends::memory(args.nats.command_partitions, CacheConfig::default());
    let state = AppState::new(args, backends.clone()).expect("state");
    (Arc::new(state), backends)
}

fn request(method: Method, uri: &str, owner: Option<&str>, body: &str) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    builder
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("request")
}

async fn json(response: Response<BoxBody>) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

// =============================================================================
// Health and routing
// =============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let (state, _) = dev_state();

    let response = handle_request(state.clone(), request(Method::GET, "/health", None, "")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = handle_request(state.clone(), request(Method::GET, "/ready", None, "")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = handle_request(state, request(Method::GET, "/version", None, "")).await;
    let body = json(response).await;
    assert_eq!(body["service"], "itemgate");
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let (state, _) = dev_state();

    let response = handle_request(state.clone(), request(Method::GET, "/nope", None, "")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = handle_request(state.clone(), request(Method::PATCH, "/items", None, "")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = handle_request(state, request(Method::OPTIONS, "/items", None, "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("access-control-allow-methods"));
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_create_requires_owner() {
    let (state, _) = dev_state();

    let response = handle_request(
        state,
        request(Method::POST, "/items", None, r#"{"title":"Buy milk"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let (state, _) = dev_state();

    let response = handle_request(
        state.clone(),
        request(Method::POST, "/items", Some("u1"), r#"{"title":"   "}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = handle_request(
        state.clone(),
        request(Method::POST, "/items", Some("u1"), "{not json"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert!(body["error"].is_string());

    assert_eq!(state.submitter.stats().accepted, 0);
}

#[tokio::test]
async fn test_writes_are_accepted() {
    let (state, _) = dev_state();

    let response = handle_request(
        state.clone(),
        request(Method::POST, "/items", Some("u1"), r#"{"title":"Buy milk"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json(response).await;
    assert_eq!(body["message"], "Item creation queued");
    let id = body["id"].as_str().expect("id").to_string();
    assert!(!id.is_empty());

    let uri = format!("/items/{}", id);
    let response = handle_request(
        state.clone(),
        request(Method::PUT, &uri, Some("u1"), r#"{"completed":true}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json(response).await["message"], "Item update queued");

    let response = handle_request(state.clone(), request(Method::DELETE, &uri, Some("u1"), "")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json(response).await["id"], id.as_str());

    assert_eq!(state.submitter.stats().accepted, 3);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (state, _) = dev_state();

    let title = "x".repeat(70 * 1024);
    let body = format!(r#"{{"title":"{}"}}"#, title);
    let response = handle_request(
        state.clone(),
        request(Method::POST, "/items", Some("u1"), &body),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.submitter.stats().accepted, 0);
}

#[tokio::test]
async fn test_bearer_token_names_owner() {
    let (state, _) = dev_state();
    let token = state
        .jwt
        .as_ref()
        .expect("validator")
        .generate_token("token-user", 60)
        .expect("token");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/items")
        .header("authorization", format!("Bearer {}", token))
        .body(Full::new(Bytes::from_static(br#"{"title":"signed"}"#)))
        .expect("request");
    let response = handle_request(state.clone(), req).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/items")
        .header("authorization", "Bearer not-a-token")
        .header("x-owner-id", "u1")
        .body(Full::new(Bytes::from_static(br#"{"title":"forged"}"#)))
        .expect("request");
    let response = handle_request(state, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_list_marks_cache_hits() {
    let (state, _) = dev_state();

    let response = handle_request(state.clone(), request(Method::GET, "/items", None, "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(json(response).await, serde_json::json!([]));

    assert!(state.writer.drain(Duration::from_secs(2)).await);

    let response = handle_request(state.clone(), request(Method::GET, "/items", None, "")).await;
    assert_eq!(response.headers()["x-cache"], "HIT");

    // A different limit is a different view
    let response = handle_request(state, request(Method::GET, "/items?limit=5", None, "")).await;
    assert_eq!(response.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn test_write_round_trip_with_processor() {
    let (state, backends) = dev_state();
    let processor = Arc::new(CommandProcessor::new(
        backends.channel.clone(),
        backends.store.clone(),
        backends.cache.clone(),
        ProcessorConfig {
            partitions: (0..backends.channel.partitions()).collect(),
            dead_letter: false,
        },
    ));
    let handle = processor.start();

    let response = handle_request(
        state.clone(),
        request(Method::POST, "/items", Some("u1"), r#"{"title":"Buy milk","description":"2L"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let id = json(response).await["id"].as_str().expect("id").to_string();

    let applied = tokio::time::timeout(Duration::from_secs(5), async {
        while processor.stats().applied < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(applied.is_ok(), "command was not applied");

    let response = handle_request(state, request(Method::GET, "/items", None, "")).await;
    assert_eq!(response.headers()["x-cache"], "MISS");
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let items: Vec<Item> = serde_json::from_slice(&bytes).expect("items");
    let found = items.into_iter().find(|i| i.id == id).expect("item visible");

    assert_eq!(found.title, "Buy milk");
    assert_eq!(found.description, "2L");
    assert_eq!(found.owner_id, "u1");

    handle.shutdown().await;
}
