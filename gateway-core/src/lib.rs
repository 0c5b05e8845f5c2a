//! Ingress→agent→egress dispatch core: the scheduler, policy gate, agent
//! runner, outbound delivery pipeline, heartbeat scheduler, and cron
//! scheduler that sit between the channel adapter registry and the
//! protocol server.

pub mod agent;
pub mod cron;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod policy;
pub mod scheduler;

pub use agent::{extract_media_hints, AgentEngine, AgentInput, AgentOutput, AgentStreamEvent, LoomAgentEngine};
pub use cron::{CronJob, CronRunRecord, CronRunStatus, CronScheduler, WakeMode};
pub use delivery::{deliver, prepare_media, DeliveryError, MediaItem, OutboundJob, PreparedMedia};
pub use error::{ErrorKind, GatewayError};
pub use heartbeat::{parse_interval, HeartbeatConfig, HeartbeatOutcome, HeartbeatScheduler, HeartbeatTarget, HEARTBEAT_OK};
pub use policy::{ChannelPolicy, DmPolicy, GateDecision, GroupPolicy, MentionConfig, PolicyGate};
pub use scheduler::{QueueMode, Run, RunState, RunTerminalEvent, Scheduler};
