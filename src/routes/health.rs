//! Health, readiness, status and version endpoints
//!
//! - /health, /healthz - liveness; 200 whenever the process is serving
//! - /ready, /readyz - 200 only when store, cache and channel all answer
//! - /status - read, write, cache writer and processor counters
//! - /version - build information

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::cache::WriterStats;
use crate::read::ReadStats;
use crate::server::AppState;
use crate::worker::ProcessorStats;
use crate::write::SubmitStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub mode: &'static str,
    pub node_id: String,
}

/// Reachability of each dependency
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store: DependencyStatus,
    pub cache: DependencyStatus,
    pub channel: DependencyStatus,
}

#[derive(Serialize)]
pub struct DependencyStatus {
    pub backend: &'static str,
    pub reachable: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub mode: &'static str,
    pub uptime_secs: u64,
    pub read: ReadStats,
    /// Keys with a coalesced fetch running now
    pub in_flight_fetches: usize,
    pub cache_writer: WriterStats,
    pub submit: SubmitStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorStats>,
}

fn mode(state: &AppState) -> &'static str {
    if state.args.dev_mode {
        "development"
    } else {
        "production"
    }
}

pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: mode(state),
        node_id: state.args.node_id.to_string(),
    };

    json_response(StatusCode::OK, &response)
}

pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let (store, cache, channel) =
        tokio::join!(state.store.ping(), state.cache.ping(), state.channel.ping());

    let response = ReadinessResponse {
        ready: store && cache && channel,
        store: DependencyStatus {
            backend: state.store.backend_name(),
            reachable: store,
        },
        cache: DependencyStatus {
            backend: state.cache.backend_name(),
            reachable: cache,
        },
        channel: DependencyStatus {
            backend: state.channel.backend_name(),
            reachable: channel,
        },
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json_response(status, &response)
}

pub async fn status_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = StatusResponse {
        node_id: state.args.node_id.to_string(),
        mode: mode(state),
        uptime_secs: state.started_at.elapsed().as_secs(),
        read: state.reader.stats(),
        in_flight_fetches: state.reader.in_flight().await,
        cache_writer: state.writer.stats(),
        submit: state.submitter.stats(),
        processor: state.processor.as_ref().map(|p| p.stats()),
    };

    json_response(StatusCode::OK, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "itemgate",
    };

    json_response(StatusCode::OK, &response)
}
