//! Infrastructure - configuration, errors, clock and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `error` - Error taxonomy shared by every component
//! - `clock` - Wall-clock source for deadlines
//! - `metrics` - Lock-free metrics collection

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use metrics::Metrics;
