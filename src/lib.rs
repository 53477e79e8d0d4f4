//! itemgate - item list gateway
//!
//! Reads are served cache-aside with concurrent misses for the same query
//! shape coalesced into one store query. Writes are accepted as commands on
//! an ordered, partitioned NATS JetStream log and applied later by the
//! command processor, which invalidates every cached list view afterwards.
//!
//! ## Components
//!
//! - **Read coordinator**: cache lookup, single-flight store fetch, background cache fill
//! - **List cache**: NATS KV bucket shared by replicas, or process memory
//! - **Write submitter**: validation and append to the owner's partition
//! - **Command processor**: per-partition apply loop with invalidation
//! - **Item store**: MongoDB, or process memory in dev mode

pub mod auth;
pub mod backends;
pub mod cache;
pub mod channel;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod nats;
pub mod read;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod types;
pub mod worker;
pub mod write;

pub use backends::Backends;
pub use config::Args;
pub use server::{run, AppState};
pub use types::{GateError, Result};
