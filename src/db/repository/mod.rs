//! Repository layer: entity-scoped database operations.

mod report;
mod summary;

pub use report::*;
pub use summary::*;
