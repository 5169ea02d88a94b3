// Shared types for the event-log corpus: event codes, event rows and the
// run parameters encoded in result file names.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// all node ids in the logs are small integers
pub type NodeId = u32;

// simulated time in seconds
pub type SimTime = f64;

// ============================================================================
// Event Classes
// ============================================================================

/// Event class of a logged row.
///
/// The numeric codes are the ones written by the simulator into the `event`
/// column. The first three mirror the packet reception states, the rest are
/// logger-only classes appended after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PacketEvent {
    /// Reception started at the destination
    Receiving = 0,
    /// Packet received without errors
    Received = 1,
    /// Reception failed because of a collision
    Corrupted = 2,
    /// Packet created at the sender
    Generated = 3,
    /// Packet discarded, sender queue full
    QueueDropped = 4,
    /// Queue length sample (the `size` column holds the length)
    QueueSize = 5,
    /// Node state sample (the `size` column holds the state)
    NodeState = 6,
    /// Reception failed because of the channel (realistic channel only)
    CorruptedByChannel = 7,
}

impl PacketEvent {
    pub const COUNT: usize = 8;

    pub const ALL: [PacketEvent; PacketEvent::COUNT] = [
        PacketEvent::Receiving,
        PacketEvent::Received,
        PacketEvent::Corrupted,
        PacketEvent::Generated,
        PacketEvent::QueueDropped,
        PacketEvent::QueueSize,
        PacketEvent::NodeState,
        PacketEvent::CorruptedByChannel,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketEvent::Receiving => "PKT_RECEIVING",
            PacketEvent::Received => "PKT_RECEIVED",
            PacketEvent::Corrupted => "PKT_CORRUPTED",
            PacketEvent::Generated => "PKT_GENERATED",
            PacketEvent::QueueDropped => "PKT_QUEUE_DROPPED",
            PacketEvent::QueueSize => "LOG_QUEUE_SIZE",
            PacketEvent::NodeState => "LOG_NODE_STATE",
            PacketEvent::CorruptedByChannel => "PKT_CORRUPTED_BY_CHANNEL",
        }
    }
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Code found in a log that is not one of the known event classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown event code {0}")]
pub struct UnknownEventCode(pub u8);

impl TryFrom<u8> for PacketEvent {
    type Error = UnknownEventCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        PacketEvent::from_code(code).ok_or(UnknownEventCode(code))
    }
}

impl From<PacketEvent> for u8 {
    fn from(event: PacketEvent) -> u8 {
        event.code()
    }
}

/// Small bit set of event classes, used to restrict reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(u16);

impl EventSet {
    pub const EMPTY: EventSet = EventSet(0);
    pub const ALL: EventSet = EventSet::of(&PacketEvent::ALL);

    pub const fn of(events: &[PacketEvent]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < events.len() {
            bits |= 1 << events[i] as u16;
            i += 1;
        }
        EventSet(bits)
    }

    pub fn contains(self, event: PacketEvent) -> bool {
        self.0 & (1 << event as u16) != 0
    }
}

// ============================================================================
// Event Rows
// ============================================================================

/// One row of a per-run log: `time,src,dst,event,size`
///
/// For generation and drop rows `dst` carries no information (the simulator
/// repeats the sender id there).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub time: SimTime,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: u32,
    pub event: PacketEvent,
}

// ============================================================================
// Run Parameters
// ============================================================================

/// A value parsed out of a file name token.
///
/// A token is numeric exactly when it is a non-empty run of ASCII digits.
/// Everything else, including signed or fractional numbers, stays text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamValue {
    Numeric(u64),
    Text(String),
}

impl ParamValue {
    pub fn is_numeric_token(token: &str) -> bool {
        !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
    }

    /// Type a token. Returns `None` for an all-digit token too large for u64.
    pub fn classify(token: &str) -> Option<Self> {
        if Self::is_numeric_token(token) {
            token.parse().ok().map(ParamValue::Numeric)
        } else {
            Some(ParamValue::Text(token.to_string()))
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ParamValue::Numeric(value) => Some(*value),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_u64().map(|value| value as f64)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Numeric(value) => write!(f, "{}", value),
            ParamValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Numeric(value)
    }
}

/// Parameters of one simulation run, taken from `<prefix>_<lambda>_<seed>.csv`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunParams {
    /// Protocol / channel variant label
    pub prefix: ParamValue,
    /// Arrival rate
    pub lambda: ParamValue,
    pub seed: ParamValue,
}

impl RunParams {
    pub fn new(prefix: &str, lambda: u64, seed: u64) -> Self {
        Self {
            prefix: ParamValue::Text(prefix.to_string()),
            lambda: ParamValue::Numeric(lambda),
            seed: ParamValue::Numeric(seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes_match_producer() {
        assert_eq!(PacketEvent::from_code(1), Some(PacketEvent::Received));
        assert_eq!(PacketEvent::from_code(3), Some(PacketEvent::Generated));
        assert_eq!(PacketEvent::from_code(4), Some(PacketEvent::QueueDropped));
        assert_eq!(PacketEvent::from_code(8), None);

        for event in PacketEvent::ALL {
            assert_eq!(PacketEvent::try_from(event.code()), Ok(event));
        }
        assert_eq!(PacketEvent::try_from(42), Err(UnknownEventCode(42)));
    }

    #[test]
    fn test_event_set() {
        let set = EventSet::of(&[PacketEvent::Received, PacketEvent::Corrupted]);
        assert!(set.contains(PacketEvent::Received));
        assert!(set.contains(PacketEvent::Corrupted));
        assert!(!set.contains(PacketEvent::CorruptedByChannel));
        assert!(!EventSet::EMPTY.contains(PacketEvent::Receiving));
        assert!(PacketEvent::ALL.iter().all(|e| EventSet::ALL.contains(*e)));
    }

    #[test]
    fn test_classify_tokens() {
        assert_eq!(ParamValue::classify("12"), Some(ParamValue::Numeric(12)));
        assert_eq!(ParamValue::classify("007"), Some(ParamValue::Numeric(7)));
        assert_eq!(
            ParamValue::classify("x"),
            Some(ParamValue::Text("x".to_string()))
        );
        // not all digits
        assert_eq!(
            ParamValue::classify("1.5"),
            Some(ParamValue::Text("1.5".to_string()))
        );
        assert_eq!(
            ParamValue::classify("-3"),
            Some(ParamValue::Text("-3".to_string()))
        );
        assert_eq!(ParamValue::classify("99999999999999999999999"), None);
    }
}
