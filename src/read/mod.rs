//! Read path

pub mod coalesce;
pub mod coordinator;

pub use coalesce::{Flight, Role, SingleFlight};
pub use coordinator::{ListResponse, ReadCoordinator, ReadSource, ReadStats};
