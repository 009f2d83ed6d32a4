//! Shared library surface for the route planner service and tools.

pub mod api;
pub mod backoff;
pub mod config;
pub mod feed;
pub mod loops;
pub mod persistence;
pub mod state;
