//! Error taxonomy shared by the decoder, reconciler and correlation engine
//!
//! Callers at the API boundary branch on [`CoreError::kind`]; the queue
//! consumer only cares whether a message was handled or not.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed message envelope or type-specific payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Device, lot, slot or barrier lookup failed
    #[error("{entity} not registered: {key}")]
    NotRegistered { entity: &'static str, key: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Duplicate identifier, active session already present, or a lost
    /// compare-and-swap on a gate event
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition for gate event {event_id}: {from} -> {to}")]
    InvalidTransition { event_id: String, from: &'static str, to: &'static str },

    #[error("invalid request: {0}")]
    Invalid(String),

    /// Queue receive/delete or MQTT publish failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("plate recognition failed: {0}")]
    Recognition(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Session creation after recognition failed; the gate event is parked in `error`
    #[error("gate event {event_id} failed: {reason}")]
    Unrecoverable { event_id: String, reason: String },
}

/// Coarse error class exposed to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Internal,
}

impl CoreError {
    pub fn not_registered(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotRegistered { entity, key: key.into() }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound { entity, key: key.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered { .. } | Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Decode(_) | Self::Invalid(_) => ErrorKind::Invalid,
            Self::Transport(_)
            | Self::Recognition(_)
            | Self::Storage(_)
            | Self::Unrecoverable { .. } => ErrorKind::Internal,
        }
    }

    /// Errors worth retrying through queue redelivery
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Storage(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(CoreError::not_registered("slot", "dev-1/A1").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::Conflict("dup".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            CoreError::InvalidTransition {
                event_id: "e1".into(),
                from: "timeout",
                to: "lpr_completed"
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(CoreError::Decode("bad".into()).kind(), ErrorKind::Invalid);
        assert_eq!(CoreError::Transport("down".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display_names_entity() {
        let err = CoreError::not_registered("barrier", "esp32-01/entry");
        assert_eq!(err.to_string(), "barrier not registered: esp32-01/entry");
        assert!(!err.is_transient());
        assert!(CoreError::Transport("timeout".into()).is_transient());
    }
}
