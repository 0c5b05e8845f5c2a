//! Per-session scheduler (spec §4.3): guarantees at-most-one active Run per
//! SessionKey, with queue modes governing what happens when a new envelope
//! arrives mid-run.
//!
//! Grounded on the teacher's `serve/src/run/*` task-spawn + `mpsc` event
//! streaming shape; the concurrent session registry uses `dashmap` (already
//! a `loom` dependency) and abort handles use `tokio_util::sync::CancellationToken`
//! (already a `loom`/`loom-acp` dependency).

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use envelope::Envelope;
use session::{SessionKey, SessionStore};

use crate::agent::{AgentEngine, AgentInput, AgentOutput, AgentStreamEvent};
use crate::error::GatewayError;

/// `messages.queue.mode` (spec §6 config schema, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Interrupt,
    Steer,
    Followup,
    Collect,
    BacklogInterrupt,
    BacklogSteer,
    BacklogFollowup,
    BacklogCollect,
}

impl QueueMode {
    /// Backlog variants additionally replay envelopes that arrived while the
    /// session's last run was aborted, ahead of the new one (spec §4.3).
    fn is_backlog(self) -> bool {
        matches!(
            self,
            QueueMode::BacklogInterrupt | QueueMode::BacklogSteer | QueueMode::BacklogFollowup | QueueMode::BacklogCollect
        )
    }

    fn base(self) -> BaseMode {
        match self {
            QueueMode::Interrupt | QueueMode::BacklogInterrupt => BaseMode::Interrupt,
            QueueMode::Steer | QueueMode::BacklogSteer => BaseMode::Steer,
            QueueMode::Followup | QueueMode::BacklogFollowup => BaseMode::Followup,
            QueueMode::Collect | QueueMode::BacklogCollect => BaseMode::Collect,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BaseMode {
    Interrupt,
    Steer,
    Followup,
    Collect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Streaming,
    AwaitingFinal,
    Aborted,
    Final,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Aborted | RunState::Final | RunState::Error)
    }
}

/// One agent invocation (spec §3 "Run").
pub struct Run {
    pub run_id: String,
    pub session_key: SessionKey,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub idempotency_key: String,
    pub state: RunState,
    /// The envelope this Run was dispatched for — carried onto its terminal
    /// event so the channel it arrived on can be resolved again for delivery.
    pub envelope: Envelope,
    /// False for `run_now` re-entry (heartbeat, cron): those callers await
    /// the `AgentOutput` directly and own delivery themselves, so the
    /// terminal-event bridge must not also deliver it (spec §4.5, §2 "J and
    /// K re-enter at F").
    pub auto_deliver: bool,
    cancellation: CancellationToken,
}

struct QueuedEnvelope {
    envelope: Envelope,
    mode: QueueMode,
}

struct RunSlot {
    run: Run,
    /// Envelopes queued behind the in-flight run (`followup`/`collect`).
    pending: VecDeque<QueuedEnvelope>,
    /// Envelopes stranded by an aborted run, replayed ahead of the next
    /// envelope only under a `backlog-*` mode (spec §4.3 "backlog variants").
    backlog: VecDeque<QueuedEnvelope>,
}

/// Terminal event published to the protocol server (spec §4.3 "Run
/// termination").
#[derive(Clone, Debug)]
pub struct RunTerminalEvent {
    pub run_id: String,
    pub session_key: SessionKey,
    pub state: RunState,
    pub output: Option<AgentOutput>,
    pub error: Option<String>,
    /// Originating envelope, for resolving an outbound channel/target at the
    /// terminal-event bridge (spec §4.6).
    pub envelope: Envelope,
    pub auto_deliver: bool,
}

pub type TerminalSink = mpsc::UnboundedSender<RunTerminalEvent>;
pub type StreamSink = mpsc::UnboundedSender<AgentStreamEvent>;

/// Registry `SessionKey -> RunSlot`. Distinct keys run fully in parallel;
/// within one key, a slot's own mutex guard serializes dispatch so at most
/// one Run is ever non-terminal per key (spec §5, §8).
pub struct Scheduler {
    slots: DashMap<SessionKey, Arc<Mutex<RunSlot>>>,
    awaiters: DashMap<String, oneshot::Sender<Result<AgentOutput, GatewayError>>>,
    engine: Arc<dyn AgentEngine>,
    sessions: Arc<SessionStore>,
    terminal_events: TerminalSink,
    stream_events: StreamSink,
}

impl Scheduler {
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        sessions: Arc<SessionStore>,
        terminal_events: TerminalSink,
        stream_events: StreamSink,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            awaiters: DashMap::new(),
            engine,
            sessions,
            terminal_events,
            stream_events,
        }
    }

    /// Dispatches `envelope` and awaits its terminal result directly, for
    /// synthesized re-entry paths (heartbeat, cron) that need the agent's
    /// output rather than fire-and-forget delivery (spec §2 "J and K
    /// re-enter at F"). Returns `None` if a Run for `session_key` is
    /// already non-terminal — callers treat that as the re-entrancy guard
    /// (spec §4.5 "requests-in-flight").
    pub async fn run_now(self: &Arc<Self>, session_key: SessionKey, envelope: Envelope) -> Option<Result<AgentOutput, GatewayError>> {
        let slot = self
            .slots
            .entry(session_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RunSlot { run: idle_run(&session_key), pending: VecDeque::new(), backlog: VecDeque::new() })))
            .clone();
        let guard = slot.lock().await;
        if !guard.run.state.is_terminal() {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.awaiters.insert(run_id.clone(), tx);
        self.dispatch_with_id(session_key, guard, envelope, run_id, false).await;
        rx.await.ok()
    }

    pub async fn enqueue(self: &Arc<Self>, session_key: SessionKey, envelope: Envelope, mode: QueueMode) {
        let slot = self
            .slots
            .entry(session_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RunSlot { run: idle_run(&session_key), pending: VecDeque::new(), backlog: VecDeque::new() })))
            .clone();

        let mut guard = slot.lock().await;

        if guard.run.state.is_terminal() {
            let aborted_last_run = self
                .sessions
                .get(&session_key)
                .await
                .map(|e| e.aborted_last_run)
                .unwrap_or(false);

            let mut queue: VecDeque<QueuedEnvelope> = if mode.is_backlog() && aborted_last_run {
                std::mem::take(&mut guard.backlog)
            } else {
                guard.backlog.clear();
                VecDeque::new()
            };
            queue.push_back(QueuedEnvelope { envelope, mode });

            let composed = compose(queue);
            self.dispatch(session_key, guard, composed).await;
            return;
        }

        match mode.base() {
            BaseMode::Interrupt => {
                guard.run.cancellation.cancel();
                self.publish_terminal(&guard.run, RunState::Aborted, None, None);
                self.dispatch(session_key, guard, envelope).await;
            }
            BaseMode::Steer => {
                // loom's current runner has no mid-run steer channel; fall
                // back to followup semantics until the engine exposes one.
                guard.pending.push_back(QueuedEnvelope { envelope, mode });
            }
            BaseMode::Followup | BaseMode::Collect => {
                guard.pending.push_back(QueuedEnvelope { envelope, mode });
            }
        }
    }

    /// Idempotent: cancelling an already-terminal or unknown run is a no-op.
    pub async fn abort(self: &Arc<Self>, session_key: &str) {
        if let Some(slot) = self.slots.get(session_key) {
            let guard = slot.lock().await;
            if !guard.run.state.is_terminal() {
                guard.run.cancellation.cancel();
            }
        }
    }

    pub async fn run_state(&self, session_key: &str) -> Option<RunState> {
        let slot = self.slots.get(session_key)?;
        let guard = slot.lock().await;
        Some(guard.run.state)
    }

    async fn dispatch(self: &Arc<Self>, session_key: SessionKey, guard: tokio::sync::MutexGuard<'_, RunSlot>, envelope: Envelope) {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.dispatch_with_id(session_key, guard, envelope, run_id, true).await;
    }

    async fn dispatch_with_id(
        self: &Arc<Self>,
        session_key: SessionKey,
        mut guard: tokio::sync::MutexGuard<'_, RunSlot>,
        envelope: Envelope,
        run_id: String,
        auto_deliver: bool,
    ) {
        let cancellation = CancellationToken::new();
        guard.run = Run {
            run_id: run_id.clone(),
            session_key: session_key.clone(),
            started_at: chrono::Utc::now(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            state: RunState::Pending,
            envelope: envelope.clone(),
            auto_deliver,
            cancellation: cancellation.clone(),
        };
        drop(guard);

        let scheduler = self.clone();
        let engine = self.engine.clone();
        let stream_events = self.stream_events.clone();
        tokio::spawn(async move {
            let input = AgentInput {
                message: envelope.command_body.clone(),
                thread_id: Some(session_key.clone()),
                verbose: false,
            };

            let (tx, mut rx) = mpsc::unbounded_channel();
            let forward = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let _ = stream_events.send(ev);
                }
            });

            let result = tokio::select! {
                _ = cancellation.cancelled() => Err(GatewayError::Aborted),
                r = engine.run(input, tx) => r,
            };
            forward.abort();

            scheduler.finish_run(&session_key, &run_id, result).await;
        });
    }

    async fn finish_run(self: &Arc<Self>, session_key: &str, run_id: &str, result: Result<AgentOutput, GatewayError>) {
        let Some(slot) = self.slots.get(session_key).map(|s| s.clone()) else { return };
        let mut guard = slot.lock().await;
        if guard.run.run_id != run_id {
            return;
        }

        let (state, output, error) = match result {
            Ok(out) => (RunState::Final, Some(out), None),
            Err(GatewayError::Aborted) => (RunState::Aborted, None, None),
            Err(e) => (RunState::Error, None, Some(e.to_string())),
        };
        guard.run.state = state;
        self.publish_terminal(&guard.run, state, output.clone(), error.clone());

        if let Some((_, tx)) = self.awaiters.remove(run_id) {
            let reply = match (&output, &error) {
                (Some(out), _) => Ok(out.clone()),
                (None, Some(_)) if state == RunState::Aborted => Err(GatewayError::Aborted),
                (None, Some(msg)) => Err(GatewayError::Engine(msg.clone())),
                (None, None) => Err(GatewayError::Aborted),
            };
            let _ = tx.send(reply);
        }

        let _ = self
            .sessions
            .update(session_key, |entry| {
                entry.aborted_last_run = state == RunState::Aborted;
            })
            .await;

        if state == RunState::Aborted && !guard.pending.is_empty() {
            // Stranded by a disconnect-style abort: preserved for the next
            // backlog-mode enqueue instead of auto-restarting.
            let rest: VecDeque<QueuedEnvelope> = guard.pending.drain(..).collect();
            guard.backlog.extend(rest);
            return;
        }

        if !guard.pending.is_empty() {
            let queue: VecDeque<QueuedEnvelope> = guard.pending.drain(..).collect();
            let composed = compose(queue);
            let key = session_key.to_string();
            drop(guard);
            self.dispatch_idle(key, composed).await;
        }
    }

    async fn dispatch_idle(self: &Arc<Self>, session_key: SessionKey, envelope: Envelope) {
        if let Some(slot) = self.slots.get(&session_key).map(|s| s.clone()) {
            let guard = slot.lock().await;
            self.dispatch(session_key, guard, envelope).await;
        }
    }

    fn publish_terminal(&self, run: &Run, state: RunState, output: Option<AgentOutput>, error: Option<String>) {
        let _ = self.terminal_events.send(RunTerminalEvent {
            run_id: run.run_id.clone(),
            session_key: run.session_key.clone(),
            state,
            output,
            error,
            envelope: run.envelope.clone(),
            auto_deliver: run.auto_deliver,
        });
    }
}

fn idle_run(session_key: &str) -> Run {
    Run {
        run_id: String::new(),
        session_key: session_key.to_string(),
        started_at: chrono::Utc::now(),
        idempotency_key: String::new(),
        state: RunState::Final,
        // Never dispatched, never published — overwritten by the first real
        // `dispatch_with_id` before this slot's Run is ever observed.
        envelope: Envelope {
            raw_body: String::new(),
            command_body: String::new(),
            reply_to: None,
            surface: String::new(),
            from: String::new(),
            to: session_key.to_string(),
            chat_type: envelope::ChatType::Direct,
            group_subject: None,
            group_members: None,
            room: None,
            space: None,
            sender_name: None,
            sender_identity: None,
            message_id: String::new(),
            timestamp: chrono::Utc::now(),
            media: None,
            was_mentioned: false,
            thread_id: None,
            media_urls: vec![],
            reply_target_id: None,
        },
        auto_deliver: false,
        cancellation: CancellationToken::new(),
    }
}

/// Composes a queue of pending/backlog envelopes into the single envelope
/// that gets dispatched as the next Run (spec §4.3 `followup`/`collect`,
/// §8 "exactly one `[Current message` section"). On the final
/// `running→idle` transition with a non-empty queue, every base mode starts
/// its new run on the concatenation of the pending envelopes — `collect`
/// wraps the prior bodies as context ahead of the final one with a single
/// `[Current message` marker; every other base mode (`interrupt`/`steer`/
/// `followup`) joins the queued bodies in arrival order instead of silently
/// dropping all but the last.
fn compose(mut queue: VecDeque<QueuedEnvelope>) -> Envelope {
    debug_assert!(!queue.is_empty());
    if queue.len() == 1 {
        return queue.pop_back().unwrap().envelope;
    }

    let last = queue.pop_back().unwrap();
    let history: Vec<String> = queue.into_iter().map(|q| q.envelope.raw_body).collect();
    let mut composed = last.envelope;

    composed.command_body = if matches!(last.mode.base(), BaseMode::Collect) {
        format!(
            "[Chat messages since your last reply — for context]\n{}\n[Current message — respond to this]\n{}",
            history.join("\n"),
            composed.command_body
        )
    } else {
        let mut bodies = history;
        bodies.push(composed.command_body);
        bodies.join("\n")
    };
    composed
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelope::ChatType;

    fn env(body: &str) -> Envelope {
        Envelope {
            raw_body: body.to_string(),
            command_body: body.to_string(),
            reply_to: None,
            surface: "webchat".into(),
            from: "u1".into(),
            to: "main".into(),
            chat_type: ChatType::Direct,
            group_subject: None,
            group_members: None,
            room: None,
            space: None,
            sender_name: None,
            sender_identity: None,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            media: None,
            was_mentioned: false,
            thread_id: None,
            media_urls: vec![],
            reply_target_id: None,
        }
    }

    #[test]
    fn compose_followup_concatenates_all_pending_bodies() {
        let mut q = VecDeque::new();
        q.push_back(QueuedEnvelope { envelope: env("first"), mode: QueueMode::Followup });
        q.push_back(QueuedEnvelope { envelope: env("second"), mode: QueueMode::Followup });
        let out = compose(q);
        assert_eq!(out.command_body, "first\nsecond");
    }

    #[test]
    fn compose_collect_wraps_history_and_current_message() {
        let mut q = VecDeque::new();
        q.push_back(QueuedEnvelope { envelope: env("first"), mode: QueueMode::Collect });
        q.push_back(QueuedEnvelope { envelope: env("second"), mode: QueueMode::Collect });
        let out = compose(q);
        assert_eq!(out.command_body.matches("[Current message").count(), 1);
        assert!(out.command_body.contains("first"));
        assert!(out.command_body.ends_with("second"));
    }

    #[tokio::test]
    async fn abort_on_unknown_session_is_a_noop() {
        struct NoopEngine;
        #[async_trait::async_trait]
        impl AgentEngine for NoopEngine {
            async fn run(&self, _input: AgentInput, _on_event: crate::agent::EventSink) -> Result<AgentOutput, GatewayError> {
                Ok(AgentOutput::default())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(dir.path().join("s.json")).await.unwrap());
        let (terminal_tx, _terminal_rx) = mpsc::unbounded_channel();
        let (stream_tx, _stream_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler::new(Arc::new(NoopEngine), sessions, terminal_tx, stream_tx));
        scheduler.abort("never-seen").await;
    }

    struct EchoEngine;
    #[async_trait::async_trait]
    impl AgentEngine for EchoEngine {
        async fn run(&self, input: AgentInput, _on_event: crate::agent::EventSink) -> Result<AgentOutput, GatewayError> {
            Ok(AgentOutput { payloads: vec![input.message], ..Default::default() })
        }
    }

    #[tokio::test]
    async fn run_now_returns_agent_output_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(dir.path().join("s.json")).await.unwrap());
        let (terminal_tx, _terminal_rx) = mpsc::unbounded_channel();
        let (stream_tx, _stream_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler::new(Arc::new(EchoEngine), sessions, terminal_tx, stream_tx));

        let result = scheduler.run_now("main".to_string(), env("ping")).await;
        let output = result.expect("idle session should dispatch").expect("engine does not error");
        assert_eq!(output.payloads, vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn run_now_reports_re_entrancy_guard_when_already_running() {
        struct StallEngine;
        #[async_trait::async_trait]
        impl AgentEngine for StallEngine {
            async fn run(&self, _input: AgentInput, _on_event: crate::agent::EventSink) -> Result<AgentOutput, GatewayError> {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(AgentOutput::default())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::open(dir.path().join("s.json")).await.unwrap());
        let (terminal_tx, _terminal_rx) = mpsc::unbounded_channel();
        let (stream_tx, _stream_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Scheduler::new(Arc::new(StallEngine), sessions, terminal_tx, stream_tx));

        scheduler.enqueue("main".to_string(), env("first"), QueueMode::Interrupt).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = scheduler.run_now("main".to_string(), env("heartbeat")).await;
        assert!(second.is_none(), "heartbeat should skip while a run is in flight");
    }
}
