//! Database schemas for itemgate

mod item;

pub use item::ItemDoc;
