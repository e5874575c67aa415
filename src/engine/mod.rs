//! Aggregation engine.
//!
//! Pure functions that turn raw health-check samples into summaries, trend
//! buckets, incidents and the alerts they raise. Nothing in here performs I/O or reads a clock;
//! the reference instant is always passed in.

mod alert;
mod incident;
mod models;
mod rollup;
mod summary;
mod trend;
mod window;

pub use alert::*;
pub use incident::*;
pub use models::*;
pub use rollup::*;
pub use summary::*;
pub use trend::*;
pub use window::*;

use thiserror::Error;

/// Engine error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("unsupported window: {0:?} (expected one of 1h, 24h, 7d, 30d)")]
    UnsupportedWindow(String),
    #[error("bucket count must be at least 1, got {0}")]
    InvalidBucketCount(usize),
    #[error("invalid status thresholds: up={up}, degraded={degraded}")]
    InvalidThresholds { up: f64, degraded: f64 },
    #[error("invalid incident policy: fail={fail_threshold}, recover={recover_threshold}")]
    InvalidIncidentPolicy {
        fail_threshold: u32,
        recover_threshold: u32,
    },
    #[error("invalid rollup: {0}")]
    InvalidRollup(String),
}
