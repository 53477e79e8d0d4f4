//! Command processing
//!
//! Runs embedded in the HTTP front or standalone as `itemgate-worker`.

pub mod processor;

pub use processor::{
    ApplyOutcome, CommandProcessor, ProcessorConfig, ProcessorHandle, ProcessorStats,
};
