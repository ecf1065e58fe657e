//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `decoder` - Raw queue body to typed device message
//! - `queue` - Durable queue seam and in-process visibility-timeout queue
//! - `consumer` - Long-poll loop feeding the dispatcher
//! - `mqtt_ingress` - Device topics onto the queue
//! - `mqtt_command` - Barrier command publisher
//! - `mqtt_live` - Live notification forwarder
//! - `recognizer` - HTTP plate recognition client
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod consumer;
pub mod decoder;
pub mod mqtt_command;
pub mod mqtt_ingress;
pub mod mqtt_live;
pub mod prometheus;
pub mod queue;
pub mod recognizer;

// Re-export commonly used types
pub use consumer::{ConsumerSettings, QueueConsumer};
pub use mqtt_command::MqttCommandPublisher;
pub use mqtt_live::MqttLiveForwarder;
pub use queue::{EventQueue, MemoryQueue, QueueMessage};
pub use recognizer::{HttpPlateRecognizer, PlateRecognizer};
