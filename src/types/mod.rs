//! Shared types: the item model and the crate error

pub mod error;
pub mod item;

pub use error::{GateError, Result};
pub use item::{Item, ItemPatch};
