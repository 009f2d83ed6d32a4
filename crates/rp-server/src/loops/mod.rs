//! Background loops for continuous processing.

pub mod ingest_loop;
pub mod stats_loop;
