//! Parking gateway core
//!
//! Correlates edge-device events from a durable queue into gate workflows
//! and pushes live status to subscribers. Exposes modules for integration
//! testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod repository;
pub mod services;
