//! Request coalescing
//!
//! Concurrent misses for the same key share one backing fetch. The first
//! caller registers a broadcast channel and starts the fetch on its own task;
//! later callers subscribe to that channel. The fetch owns its task, so a
//! caller that gives up (timeout, disconnect) never cancels it for the rest.
//! The entry is removed and the result broadcast in one critical section, so
//! a caller either joins the running fetch or starts a fresh one.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::types::{GateError, Result};

type Outcome = Result<Bytes>;

/// A fetch in progress
struct InFlight {
    sender: broadcast::Sender<Outcome>,
    started_at: Instant,
    waiters: usize,
}

/// How a caller took part in a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the backing fetch
    Leader,
    /// Joined a fetch someone else started
    Follower,
}

/// Result of [`SingleFlight::run`]
#[derive(Debug)]
pub struct Flight {
    pub result: Outcome,
    pub role: Role,
}

/// At most one in-flight fetch per key
#[derive(Clone, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, or wait on the fetch already running for it.
    ///
    /// `fetch` is only polled when this caller becomes the leader.
    pub async fn run<Fut>(&self, key: &str, fetch: Fut) -> Flight
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (mut receiver, role) = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(flight) = in_flight.get_mut(key) {
                flight.waiters += 1;
                (flight.sender.subscribe(), Role::Follower)
            } else {
                let (sender, receiver) = broadcast::channel(1);
                in_flight.insert(
                    key.to_string(),
                    InFlight {
                        sender,
                        started_at: Instant::now(),
                        waiters: 1,
                    },
                );
                self.spawn_fetch(key.to_string(), fetch);
                (receiver, Role::Leader)
            }
        };

        let result = match receiver.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(GateError::Internal(format!(
                "Coalesced fetch for {} ended without a result",
                key
            ))),
        };

        Flight { result, role }
    }

    /// Number of keys with a fetch in progress
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    fn spawn_fetch<Fut>(&self, key: String, fetch: Fut)
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            // Inner task so a panicking fetch still completes the flight
            let outcome = match tokio::spawn(fetch).await {
                Ok(outcome) => outcome,
                Err(e) => Err(GateError::Internal(format!("Fetch task failed: {}", e))),
            };

            let mut in_flight = in_flight.lock().await;
            if let Some(flight) = in_flight.remove(&key) {
                debug!(
                    key = %key,
                    waiters = flight.waiters,
                    duration_ms = flight.started_at.elapsed().as_millis() as u64,
                    success = outcome.is_ok(),
                    "Coalesced fetch completed"
                );
                // No receivers left is fine: every caller gave up
                let _ = flight.sender.send(outcome);
            }
        });
    }
}
