pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod ingest;
pub mod observability;
pub mod statistics;

pub use ingest::{CurveFetcher, Ingestor};
