//! Shared enums and identifiers for the parking gateway

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Newtype wrapper for parking lot IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub i64);

impl std::fmt::Display for LotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for parking session IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the lot a gate event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDirection {
    Entry,
    Exit,
}

impl GateDirection {
    /// Entry if the sensor flags itself as entry-area or reports an entry-side area
    pub fn classify(is_entry_area: bool, gate_area: &str) -> Self {
        if is_entry_area || gate_area == "entry_approach" || gate_area == "entry_passed" {
            Self::Entry
        } else {
            Self::Exit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }
}

impl std::fmt::Display for GateDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic classification of a gate event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateEventType {
    #[serde(rename = "vehicle_approaching")]
    Approaching,
    #[serde(rename = "vehicle_at_gate")]
    AtGate,
    #[serde(rename = "vehicle_passed")]
    Passed,
    #[serde(rename = "gate_timeout")]
    Timeout,
}

impl GateEventType {
    /// Map a raw sensor event type; anything unrecognized counts as at-gate
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "presence_detected" => Self::Approaching,
            "vehicle_passed" => Self::Passed,
            _ => Self::AtGate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approaching => "vehicle_approaching",
            Self::AtGate => "vehicle_at_gate",
            Self::Passed => "vehicle_passed",
            Self::Timeout => "gate_timeout",
        }
    }
}

/// Gate event workflow state
///
/// ```text
/// pending -> awaiting_recognition -> lpr_completed -> session_created
/// pending | awaiting_recognition -> timeout
/// any non-terminal -> error
/// pending -> manual_override
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateEventStatus {
    Pending,
    AwaitingRecognition,
    LprCompleted,
    SessionCreated,
    Timeout,
    Error,
    ManualOverride,
}

impl GateEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingRecognition => "awaiting_recognition",
            Self::LprCompleted => "lpr_completed",
            Self::SessionCreated => "session_created",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::ManualOverride => "manual_override",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionCreated | Self::Timeout | Self::Error | Self::ManualOverride
        )
    }

    /// Whether the sweeper may expire an event in this state
    pub fn is_expirable(&self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingRecognition)
    }

    /// Forward-only transition table; `lpr_completed -> lpr_completed` lets a
    /// later result or override replace a low-confidence reading
    pub fn can_transition_to(&self, next: GateEventStatus) -> bool {
        use GateEventStatus::*;
        match (self, next) {
            (Pending, AwaitingRecognition | LprCompleted | Timeout | Error | ManualOverride) => {
                true
            }
            (AwaitingRecognition, LprCompleted | Timeout | Error) => true,
            (LprCompleted, LprCompleted | SessionCreated | Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for GateEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Vacant,
    Occupied,
    Maintenance,
    Reserved,
}

impl SlotStatus {
    pub fn from_occupied(occupied: bool) -> Self {
        if occupied {
            Self::Occupied
        } else {
            Self::Vacant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vacant => "vacant",
            Self::Occupied => "occupied",
            Self::Maintenance => "maintenance",
            Self::Reserved => "reserved",
        }
    }
}

/// Barrier state as reported by the controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    OpenedCommand,
    ClosedCommand,
    OpenedAuto,
    ClosedAuto,
    Closed,
    Error,
    #[serde(other)]
    Unknown,
}

impl BarrierState {
    /// Command implied by the state suffix (`opened_*` -> open, `closed_*` -> close)
    pub fn implied_command(&self) -> Option<BarrierCommand> {
        match self {
            Self::OpenedCommand | Self::OpenedAuto => Some(BarrierCommand::Open),
            Self::ClosedCommand | Self::ClosedAuto => Some(BarrierCommand::Close),
            Self::Closed | Self::Error | Self::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenedCommand => "opened_command",
            Self::ClosedCommand => "closed_command",
            Self::OpenedAuto => "opened_auto",
            Self::ClosedAuto => "closed_auto",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierType {
    Entry,
    Exit,
}

impl BarrierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }
}

impl FromStr for BarrierType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            other => Err(format!("unknown barrier type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierCommand {
    Open,
    Close,
}

impl BarrierCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

impl FromStr for BarrierCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            other => Err(format!("unknown barrier command '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Maintenance,
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }
}

/// Processing outcome recorded on the device event audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    Pending,
    Processed,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_classification() {
        assert_eq!(GateDirection::classify(true, "exit_approach"), GateDirection::Entry);
        assert_eq!(GateDirection::classify(false, "entry_approach"), GateDirection::Entry);
        assert_eq!(GateDirection::classify(false, "entry_passed"), GateDirection::Entry);
        assert_eq!(GateDirection::classify(false, "exit_approach"), GateDirection::Exit);
        assert_eq!(GateDirection::classify(false, ""), GateDirection::Exit);
    }

    #[test]
    fn test_event_type_mapping() {
        assert_eq!(GateEventType::from_raw("presence_detected"), GateEventType::Approaching);
        assert_eq!(GateEventType::from_raw("vehicle_at_gate"), GateEventType::AtGate);
        assert_eq!(GateEventType::from_raw("vehicle_passed"), GateEventType::Passed);
        assert_eq!(GateEventType::from_raw("loitering"), GateEventType::AtGate);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use GateEventStatus::*;
        let all = [
            Pending,
            AwaitingRecognition,
            LprCompleted,
            SessionCreated,
            Timeout,
            Error,
            ManualOverride,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_no_transition_back_to_pending() {
        use GateEventStatus::*;
        for from in [Pending, AwaitingRecognition, LprCompleted] {
            assert!(!from.can_transition_to(Pending));
        }
        assert!(!AwaitingRecognition.can_transition_to(ManualOverride));
        assert!(!LprCompleted.can_transition_to(Timeout));
        assert!(LprCompleted.can_transition_to(SessionCreated));
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&GateEventStatus::AwaitingRecognition).unwrap();
        assert_eq!(json, "\"awaiting_recognition\"");
        let json = serde_json::to_string(&GateEventType::Timeout).unwrap();
        assert_eq!(json, "\"gate_timeout\"");
    }

    #[test]
    fn test_barrier_state_commands() {
        let state: BarrierState = serde_json::from_str("\"opened_auto\"").unwrap();
        assert_eq!(state.implied_command(), Some(BarrierCommand::Open));
        let state: BarrierState = serde_json::from_str("\"closed_command\"").unwrap();
        assert_eq!(state.implied_command(), Some(BarrierCommand::Close));
        let state: BarrierState = serde_json::from_str("\"half_open\"").unwrap();
        assert_eq!(state, BarrierState::Unknown);
        assert_eq!(state.implied_command(), None);
    }

    #[test]
    fn test_barrier_command_parse() {
        assert_eq!("open".parse::<BarrierCommand>(), Ok(BarrierCommand::Open));
        assert!("lift".parse::<BarrierCommand>().is_err());
        assert_eq!("exit".parse::<BarrierType>(), Ok(BarrierType::Exit));
    }
}
