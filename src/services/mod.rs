//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `dispatcher` - Audit log and routing of decoded device messages
//! - `reconciler` - Slot, barrier and device status updates
//! - `correlator` - Gate event lifecycle and recognition-driven check-in
//! - `broadcaster` - Best-effort live notification fan-out
//! - `sweeper` - Periodic expiry of overdue gate events
//! - `check_in` - Parking session creation
//! - `barrier_control` - Outbound barrier commands
//! - `api` - Correlation and barrier operations for the HTTP layer

pub mod api;
pub mod barrier_control;
pub mod broadcaster;
pub mod check_in;
pub mod correlator;
pub mod dispatcher;
pub mod reconciler;
pub mod sweeper;

// Re-export commonly used types
pub use api::CorrelationApi;
pub use barrier_control::{BarrierControl, CommandPublisher};
pub use broadcaster::{create_live_broadcaster, BroadcastHub, LiveBroadcaster};
pub use check_in::{CheckInService, RepositoryCheckIn};
pub use correlator::{CorrelatorSettings, GateCorrelator};
pub use dispatcher::{DeviceEventDispatcher, Disposition};
pub use reconciler::DeviceStateReconciler;
pub use sweeper::ExpirySweeper;
