//! Persistence layer for the route planner.
//!
//! SQLite-backed system catalogue with an R*Tree index for radius queries.

pub mod db;
pub mod systems;

pub use db::{init_database, init_memory_database, Database};
pub use systems::SqliteStore;
