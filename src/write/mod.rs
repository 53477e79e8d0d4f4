//! Write path

pub mod submitter;

pub use submitter::{Accepted, SubmitStats, WriteSubmitter};
