//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo; routing is a plain match on method and path.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::JwtValidator;
use crate::backends::Backends;
use crate::cache::{CacheWriter, ListCache, WriterConfig};
use crate::channel::CommandChannel;
use crate::config::Args;
use crate::db::ItemStore;
use crate::read::ReadCoordinator;
use crate::routes;
use crate::types::{GateError, Result};
use crate::worker::CommandProcessor;
use crate::write::WriteSubmitter;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn ItemStore>,
    pub cache: Arc<dyn ListCache>,
    pub channel: Arc<dyn CommandChannel>,
    /// Background cache population
    pub writer: Arc<CacheWriter>,
    pub reader: ReadCoordinator,
    pub submitter: WriteSubmitter,
    /// Set when the processor runs in this process
    pub processor: Option<Arc<CommandProcessor>>,
    /// None only in dev mode without a secret
    pub jwt: Option<JwtValidator>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the read and write paths over the given backends
    pub fn new(args: Args, backends: Backends) -> Result<Self> {
        let jwt = args.jwt_secret().map(JwtValidator::new).transpose()?;

        let writer = Arc::new(CacheWriter::new(
            Arc::clone(&backends.cache),
            WriterConfig {
                worker_count: args.cache.cache_writer_workers,
                max_queue_size: args.cache.cache_writer_queue,
            },
        ));

        let reader = ReadCoordinator::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.cache),
            Arc::clone(&writer),
            args.cache.ttl(),
            args.request_timeout(),
        );

        let submitter = WriteSubmitter::new(Arc::clone(&backends.channel));

        Ok(Self {
            args,
            store: backends.store,
            cache: backends.cache,
            channel: backends.channel,
            writer,
            reader,
            submitter,
            processor: None,
            jwt,
            started_at: Instant::now(),
        })
    }

    /// Attach the embedded command processor
    pub fn with_processor(mut self, processor: Arc<CommandProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }
}

/// Serve until `shutdown` resolves
pub async fn run<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "itemgate listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - X-Owner-Id header accepted for writes");
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("HTTP listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move {
                                debug!("[{}] {} {}", addr, req.method(), req.uri().path());
                                Ok::<_, hyper::Error>(handle_request(state, req).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            error!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            }
        }
    }
}

/// Route one request
pub async fn handle_request<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::OPTIONS, _) => routes::preflight_response(),

        (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(&state),
        (Method::GET, "/ready") | (Method::GET, "/readyz") => routes::readiness_check(&state).await,
        (Method::GET, "/status") => routes::status_check(&state).await,
        (Method::GET, "/version") => routes::version_info(),

        (Method::GET, "/items") => routes::list_items(&state, req.uri().query()).await,

        (Method::POST, "/items") => {
            let headers = req.headers().clone();
            match read_body(req).await {
                Ok(body) => routes::create_item(&state, &headers, &body).await,
                Err(e) => routes::error_response(e),
            }
        }

        (Method::PUT, p) if item_id(p).is_some() => {
            let id = item_id(p).unwrap_or_default().to_string();
            let headers = req.headers().clone();
            match read_body(req).await {
                Ok(body) => routes::update_item(&state, &headers, &id, &body).await,
                Err(e) => routes::error_response(e),
            }
        }

        (Method::DELETE, p) if item_id(p).is_some() => {
            let id = item_id(p).unwrap_or_default();
            routes::delete_item(&state, req.headers(), id).await
        }

        (_, "/items") => routes::method_not_allowed_response(),
        (_, p) if item_id(p).is_some() => routes::method_not_allowed_response(),

        _ => routes::not_found_response(&path),
    };

    to_boxed(response)
}

/// `/items/{id}` -> `id`
fn item_id(path: &str) -> Option<&str> {
    path.strip_prefix("/items/")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Largest request body accepted on write routes
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Collect a request body, bounded by size and by the read timeout
async fn read_body<B>(req: Request<B>) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES);
    match tokio::time::timeout(Duration::from_secs(10), body.collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) if e.is::<LengthLimitError>() => Err(GateError::BadRequest(format!(
            "Request body exceeds {} bytes",
            MAX_BODY_BYTES
        ))),
        Ok(Err(e)) => Err(GateError::BadRequest(format!("Failed to read body: {}", e))),
        Err(_) => Err(GateError::Timeout("Request body not received in time".into())),
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    #[test]
    fn test_item_id() {
        assert_eq!(item_id("/items/abc"), Some("abc"));
        assert_eq!(item_id("/items/"), None);
        assert_eq!(item_id("/items"), None);
        assert_eq!(item_id("/items/a/b"), None);
    }

    #[test]
    fn test_status_codes_round_trip_through_responses() {
        let response = to_boxed(routes::error_response(GateError::Unavailable("x".into())));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    fn post(body: Vec<u8>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("/items")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let body = read_body(post(br#"{"title":"ok"}"#.to_vec())).await.unwrap();
        assert_eq!(&body[..], br#"{"title":"ok"}"#);

        let full = read_body(post(vec![b' '; MAX_BODY_BYTES])).await.unwrap();
        assert_eq!(full.len(), MAX_BODY_BYTES);
    }

    #[tokio::test]
    async fn test_read_body_rejects_oversized() {
        let result = read_body(post(vec![b' '; MAX_BODY_BYTES + 1])).await;
        match result {
            Err(GateError::BadRequest(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }
}
