//! Domain models - gate workflow records and device messages
//!
//! This module contains the canonical data types used throughout the system:
//! - `GateEvent` - the correlated workflow record and its state machine
//! - `DeviceMessage` - decoded device envelope with a typed payload
//! - `entities` - lots, slots, barriers, devices and sessions owned by the store
//! - `types` - shared enums and identifiers

pub mod entities;
pub mod gate_event;
pub mod messages;
pub mod types;

// Re-export commonly used types at module level
pub use gate_event::{GateEvent, GateEventNotification, GateEventStats};
pub use messages::{DeviceEvent, DeviceMessage, Envelope, MessageType};
pub use types::{GateDirection, GateEventStatus, GateEventType, LotId, SessionId};
