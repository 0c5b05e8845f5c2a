//! Event bus: per-connection monotonic `seq`, a bounded ring buffer for
//! resume/replay, and a [`tokio::sync::broadcast`] channel for live fan-out
//! (spec §4.4 "event fan-out", §2 "F publishes events").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;

use protocol::{EventFrame, EventKind};

const RING_CAPACITY: usize = 512;

/// Shared by every connection handler; outlives any single socket.
pub struct EventBus {
    seq: AtomicU64,
    ring: Mutex<VecDeque<EventFrame>>,
    sender: broadcast::Sender<EventFrame>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(RING_CAPACITY);
        Self { seq: AtomicU64::new(0), ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)), sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.sender.subscribe()
    }

    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Assigns the next `seq`, stores the frame in the ring buffer, and
    /// broadcasts it. Lagging receivers observe `RecvError::Lagged` and
    /// must reconcile via [`Self::replay_since`] or a synthesized gap frame.
    pub fn publish(&self, kind: EventKind) -> EventFrame {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = EventFrame { seq, kind, ts: chrono::Utc::now() };
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(frame.clone());
        }
        // No receivers is not an error here; WebChat-only deployments may
        // have zero subscribers between connections.
        let _ = self.sender.send(frame.clone());
        frame
    }

    /// Returns every frame strictly after `last_seq`, in order. If the ring
    /// has already evicted part of that range, returns `Err((expected,
    /// oldest_available))` so the caller can emit [`EventFrame::gap`].
    pub fn replay_since(&self, last_seq: u64) -> Result<Vec<EventFrame>, (u64, u64)> {
        let ring = self.ring.lock().unwrap();
        let Some(oldest) = ring.front() else {
            return Ok(Vec::new());
        };
        if oldest.seq > last_seq + 1 {
            return Err((last_seq + 1, oldest.seq));
        }
        Ok(ring.iter().filter(|f| f.seq > last_seq).cloned().collect())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards an agent run's intermediate stream events onto the bus as
/// `EventKind::Agent` frames (spec §2 "F publishes events" during a run).
pub async fn bridge_stream_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<gateway_core::AgentStreamEvent>,
    bus: std::sync::Arc<EventBus>,
) {
    while let Some(ev) = rx.recv().await {
        bus.publish(EventKind::Agent {
            payload: serde_json::json!({"kind": ev.kind, "payload": ev.payload}),
        });
    }
}

/// Forwards a run's terminal outcome onto the bus as `EventKind::Chat`,
/// republishes it on `terminal_tx` so an `expectFinal` RPC caller can
/// subscribe directly without waiting on a JSON round trip through the bus,
/// and — for runs the scheduler didn't already deliver itself (heartbeat,
/// cron) — resolves the originating channel adapter and actually sends the
/// reply (spec §4, component H; spec.md:156 "detached runs ... deliver via
/// their original channel"). Webchat is skipped: its reply already reaches
/// the client as the `Chat` event published just above.
pub async fn bridge_terminal_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<gateway_core::RunTerminalEvent>,
    bus: std::sync::Arc<EventBus>,
    terminal_tx: broadcast::Sender<gateway_core::RunTerminalEvent>,
    registry: std::sync::Arc<channels::Registry>,
) {
    while let Some(ev) = rx.recv().await {
        bus.publish(EventKind::Chat {
            payload: serde_json::json!({
                "runId": ev.run_id,
                "sessionKey": ev.session_key,
                "state": format!("{:?}", ev.state).to_lowercase(),
                "output": agent_output_to_json(ev.output.as_ref()),
                "error": ev.error,
            }),
        });

        if ev.auto_deliver && ev.envelope.surface != "webchat" {
            deliver_terminal_reply(&ev, &registry).await;
        }

        let _ = terminal_tx.send(ev);
    }
}

async fn deliver_terminal_reply(ev: &gateway_core::RunTerminalEvent, registry: &channels::Registry) {
    let Some(output) = ev.output.as_ref() else { return };
    let Some(reply) = output.last_non_empty() else { return };
    let Some(adapter) = registry.get_by_surface(&ev.envelope.surface, "default") else { return };
    let Ok(target) = adapter.resolve_target(&ev.envelope, adapter.delivery_mode()) else { return };

    let media = output
        .media
        .iter()
        .map(|m| gateway_core::MediaItem { url_or_path: m.clone(), caption: None })
        .collect();
    let job = gateway_core::OutboundJob { payloads: vec![reply.to_string()], media };
    gateway_core::deliver(adapter.as_ref(), &target, job).await;
}

/// [`gateway_core::AgentOutput`] doesn't derive `Serialize` (its fields are
/// an internal detail of the scheduler/heartbeat modules), so the event
/// bridge builds its wire shape by hand.
pub(crate) fn agent_output_to_json(output: Option<&gateway_core::AgentOutput>) -> serde_json::Value {
    match output {
        None => serde_json::Value::Null,
        Some(o) => serde_json::json!({
            "payloads": o.payloads,
            "inputTokens": o.input_tokens,
            "outputTokens": o.output_tokens,
            "totalTokens": o.total_tokens,
            "model": o.model,
            "media": o.media,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_frame() -> EventKind {
        EventKind::Health { payload: serde_json::json!({"healthy": true}) }
    }

    #[test]
    fn publish_assigns_increasing_seq() {
        let bus = EventBus::new();
        let a = bus.publish(chat_frame());
        let b = bus.publish(chat_frame());
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn replay_since_returns_frames_after_cursor() {
        let bus = EventBus::new();
        bus.publish(chat_frame());
        bus.publish(chat_frame());
        bus.publish(chat_frame());
        let replayed = bus.replay_since(1).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].seq, 2);
    }

    #[test]
    fn replay_since_reports_gap_once_evicted() {
        let bus = EventBus::new();
        for _ in 0..(RING_CAPACITY + 5) {
            bus.publish(chat_frame());
        }
        let err = bus.replay_since(1).unwrap_err();
        assert!(err.0 < err.1);
    }
}
