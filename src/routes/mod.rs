//! HTTP route handlers

pub mod health;
pub mod items;

pub use health::{health_check, readiness_check, status_check, version_info};
pub use items::{create_item, delete_item, list_items, update_item};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::GateError;

/// Response with a raw JSON body
pub(crate) fn raw_json_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Serialize `body` as the JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => raw_json_response(status, Bytes::from(json)),
        Err(e) => error_response(GateError::Internal(format!(
            "Failed to serialize response: {}",
            e
        ))),
    }
}

/// `{"error": ...}` with the error's status code
pub fn error_response(err: GateError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    let body = serde_json::json!({ "error": message });
    raw_json_response(status, Bytes::from(body.to_string()))
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Authorization, Content-Type, X-Owner-Id"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    response
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    error_response(GateError::NotFound(path.to_string()))
}

pub fn method_not_allowed_response() -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": "Method not allowed" });
    raw_json_response(StatusCode::METHOD_NOT_ALLOWED, Bytes::from(body.to_string()))
}
