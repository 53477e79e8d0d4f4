//! Item endpoints
//!
//! - `GET /items[?limit=N]` - list, newest first, served from cache when possible
//! - `POST /items` - queue creation
//! - `PUT /items/{id}` - queue a merge-patch
//! - `DELETE /items/{id}` - queue removal
//!
//! Writes answer 202 once the command is queued; the change becomes visible
//! after the processor applies it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{error_response, json_response, raw_json_response};
use crate::auth::resolve_owner;
use crate::server::AppState;
use crate::types::{GateError, ItemPatch};
use crate::write::Accepted;

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItemRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
    id: String,
    message: &'static str,
}

/// `limit` query parameter; absent, non-numeric or negative means 0
pub fn parse_limit(query: Option<&str>) -> Option<u32> {
    let params: HashMap<String, String> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let raw = params.get("limit")?;
    let limit = raw.trim().parse::<i64>().unwrap_or(0).clamp(0, i64::from(u32::MAX));
    Some(limit as u32)
}

pub async fn list_items(state: &AppState, query: Option<&str>) -> Response<Full<Bytes>> {
    match state.reader.list(parse_limit(query)).await {
        Ok(list) => {
            let mut response = raw_json_response(StatusCode::OK, list.body);
            let marker = if list.source.is_hit() { "HIT" } else { "MISS" };
            response
                .headers_mut()
                .insert("x-cache", HeaderValue::from_static(marker));
            response
        }
        Err(e) => error_response(e),
    }
}

pub async fn create_item(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Response<Full<Bytes>> {
    let owner = match authenticate(state, headers) {
        Ok(owner) => owner,
        Err(e) => return error_response(e),
    };

    let request: CreateItemRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return error_response(e.into()),
    };

    let title = request.title.unwrap_or_default();
    queued(
        state
            .submitter
            .create(&owner, &title, request.description)
            .await,
        "Item creation queued",
    )
}

pub async fn update_item(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    body: &[u8],
) -> Response<Full<Bytes>> {
    let owner = match authenticate(state, headers) {
        Ok(owner) => owner,
        Err(e) => return error_response(e),
    };

    let request: UpdateItemRequest = if body.is_empty() {
        UpdateItemRequest::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => return error_response(e.into()),
        }
    };

    let patch = ItemPatch::new(request.title, request.description, request.completed);
    queued(
        state.submitter.update(&owner, id, patch).await,
        "Item update queued",
    )
}

pub async fn delete_item(state: &AppState, headers: &HeaderMap, id: &str) -> Response<Full<Bytes>> {
    let owner = match authenticate(state, headers) {
        Ok(owner) => owner,
        Err(e) => return error_response(e),
    };

    queued(
        state.submitter.delete(&owner, id).await,
        "Item deletion queued",
    )
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, GateError> {
    resolve_owner(headers, state.jwt.as_ref(), state.args.dev_mode)
}

fn queued(result: Result<Accepted, GateError>, message: &'static str) -> Response<Full<Bytes>> {
    match result {
        Ok(accepted) => json_response(
            StatusCode::ACCEPTED,
            &QueuedResponse {
                id: accepted.id,
                message,
            },
        ),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), None);
        assert_eq!(parse_limit(Some("")), None);
        assert_eq!(parse_limit(Some("limit=3")), Some(3));
        assert_eq!(parse_limit(Some("limit=0")), Some(0));
        assert_eq!(parse_limit(Some("limit=abc")), Some(0));
        assert_eq!(parse_limit(Some("limit=-5")), Some(0));
        assert_eq!(parse_limit(Some("other=1&limit=7")), Some(7));
    }
}
