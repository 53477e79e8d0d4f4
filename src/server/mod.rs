//! HTTP front

pub mod http;

pub use http::{handle_request, run, AppState, BoxBody};
