//! Server-pushed event frames with monotonic per-connection sequence and
//! gap reporting (spec §3 "EventFrame", §4.4 "Events", §8 gap invariant).
//!
//! Seq-tagged event fan-out pattern learned from a broadcast-channel mux
//! design in the reference pack (architecture only, no code copied).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Chat { payload: Value },
    Agent { payload: Value },
    Presence { payload: Value },
    Cron { payload: Value },
    #[serde(rename = "channels.status")]
    ChannelsStatus { payload: Value },
    Health { payload: Value },
    /// Emitted instead of a replayed frame when the server has already
    /// discarded the requested range (spec §4.4).
    Gap { payload: GapPayload },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GapPayload {
    pub expected: u64,
    pub received: u64,
}

/// `{seq, event, payload, ts}`. Invariant: `seq` strictly increasing within
/// a connection (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    pub ts: chrono::DateTime<chrono::Utc>,
}

impl EventFrame {
    pub fn gap(seq: u64, expected: u64, received: u64) -> Self {
        Self {
            seq,
            kind: EventKind::Gap {
                payload: GapPayload { expected, received },
            },
            ts: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_round_trips_with_seq() {
        let frame = EventFrame {
            seq: 42,
            kind: EventKind::Chat {
                payload: serde_json::json!({"runId": "r1", "state": "final"}),
            },
            ts: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: EventFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seq, 42);
        assert!(matches!(parsed.kind, EventKind::Chat { .. }));
    }

    #[test]
    fn gap_frame_carries_expected_and_received() {
        let frame = EventFrame::gap(121, 101, 120);
        match frame.kind {
            EventKind::Gap { payload } => {
                assert_eq!(payload.expected, 101);
                assert_eq!(payload.received, 120);
            }
            _ => panic!("expected gap"),
        }
    }
}
