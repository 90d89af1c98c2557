//! floe-core: Shared components for the floe ingestion crates.
//!
//! - `config/` - YAML loading with environment variable interpolation
//! - `metrics/` - Internal events and the `emit!` macro
//! - `retry` - Bounded exponential backoff with full jitter
//! - `tracing` - Subscriber initialization for CLI applications
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tracing;

pub use config::{InterpolationResult, interpolate, load_yaml, parse_yaml};
pub use error::ConfigError;
pub use retry::RetryPolicy;
pub use tracing::init_tracing;
