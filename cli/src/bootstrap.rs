//! Wires a [`GatewayState`] from the on-disk config document: loads
//! `channels.*`/`auth`/`messages.session`/`agent.heartbeat`/`cron`, builds
//! every store and scheduler, and registers the channel adapters that have
//! enough config to exist (spec §4.4 "startup", §5 "Shared resources").

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use channels::{
    DiscordAdapter, IMessageAdapter, Registry, SignalAdapter, SlackAdapter, TelegramAdapter,
    WebChatAdapter, WhatsAppAdapter,
};
use config::ConfigDocument;
use gateway_core::{CronJob, CronScheduler, HeartbeatConfig, HeartbeatScheduler, HeartbeatTarget, LoomAgentEngine, PolicyGate, Scheduler, WakeMode};
use protocol::AuthMode;
use serve::{AuthSettings, EventBus, GatewayState, RoutingConfig};
use session::{PairingStore, SessionScope, SessionStore, TranscriptStore};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("config: {0}")]
    Config(#[from] config::SchemaError),
    #[error("session store: {0}")]
    Session(#[from] session::SessionStoreError),
    #[error("node store: {0}")]
    Nodes(#[from] nodes::StoreError),
}

/// Directory layout under `--data-dir` (default `$XDG_DATA_HOME/loom`,
/// falling back to `~/.local/share/loom`): `clawdis.json` (config),
/// `sessions.json`, `nodes.sqlite3`, `transcripts/`.
pub struct Layout {
    pub config_path: PathBuf,
    pub sessions_path: PathBuf,
    pub nodes_path: PathBuf,
    pub transcripts_dir: PathBuf,
}

impl Layout {
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_path: dir.join("clawdis.json"),
            sessions_path: dir.join("sessions.json"),
            nodes_path: dir.join("nodes.sqlite3"),
            transcripts_dir: dir.join("transcripts"),
        }
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("loom")
    }
}

/// Builds every store and scheduler and assembles the shared [`GatewayState`],
/// starting the event bridges and background timers along the way. Returns
/// the state plus the listener address it should bind (`gateway.addr`,
/// default `127.0.0.1:8765`).
pub async fn bootstrap(layout: &Layout) -> Result<(Arc<GatewayState>, String), BootstrapError> {
    std::fs::create_dir_all(&layout.transcripts_dir).ok();

    let config = Arc::new(ConfigDocument::open(&layout.config_path).await?);
    let sessions = Arc::new(SessionStore::open(&layout.sessions_path).await?);
    let transcripts = Arc::new(TranscriptStore::new(&layout.transcripts_dir));
    let nodes = Arc::new(nodes::Store::new(&layout.nodes_path)?);

    let registry = Arc::new(build_registry(&config).await);

    let engine = Arc::new(LoomAgentEngine::new(None));
    let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
    let (stream_tx, stream_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(engine, sessions.clone(), terminal_tx, stream_tx));

    let pairing = PairingStore::new();
    let policy = Arc::new(PolicyGate::new(pairing));

    let heartbeat = Arc::new(HeartbeatScheduler::new(scheduler.clone(), sessions.clone(), registry.clone()));
    let cron = Arc::new(CronScheduler::new(scheduler.clone(), registry.clone()));
    load_cron_jobs(&config, &cron).await;

    let events = Arc::new(EventBus::new());
    let (run_terminal_tx, _) = broadcast::channel(256);
    serve::spawn_event_bridges(stream_rx, terminal_rx, events.clone(), run_terminal_tx.clone(), registry.clone());

    let routing = load_routing(&config).await;
    let auth = load_auth(&config).await;
    let addr = config.get_path("gateway.addr").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "127.0.0.1:8765".to_string());

    let state = Arc::new(GatewayState {
        auth,
        routing,
        scheduler,
        policy,
        heartbeat: heartbeat.clone(),
        cron: cron.clone(),
        registry,
        sessions,
        transcripts,
        nodes,
        config: config.clone(),
        events,
        terminal_events: run_terminal_tx,
    });

    if let Some(heartbeat_cfg) = load_heartbeat_config(&config, &state.routing).await {
        serve::spawn_background_schedulers(state.clone(), vec![heartbeat_cfg], std::time::Duration::from_secs(15));
    } else {
        serve::spawn_background_schedulers(state.clone(), Vec::new(), std::time::Duration::from_secs(15));
    }

    Ok((state, addr))
}

async fn build_registry(config: &ConfigDocument) -> Registry {
    let mut registry = Registry::new();
    registry.register("default", Arc::new(WebChatAdapter::new()));

    if let Some(token) = string_at(config, "channels.telegram.botToken").await {
        let allow = i64_list_at(config, "channels.telegram.allowFrom").await;
        registry.register("default", Arc::new(TelegramAdapter::new(Some(token), allow)));
    }
    if let Some(token) = string_at(config, "channels.discord.botToken").await {
        registry.register("default", Arc::new(DiscordAdapter::new(Some(token))));
    }
    if let Some(token) = string_at(config, "channels.slack.botToken").await {
        registry.register("default", Arc::new(SlackAdapter::new(Some(token))));
    }
    let whatsapp_allow = string_list_at(config, "channels.whatsapp.allowFrom").await;
    if !whatsapp_allow.is_empty() || config.get_path("channels.whatsapp").await.is_some() {
        registry.register("default", Arc::new(WhatsAppAdapter::new(whatsapp_allow)));
    }
    let signal_allow = string_list_at(config, "channels.signal.allowFrom").await;
    if !signal_allow.is_empty() || config.get_path("channels.signal").await.is_some() {
        registry.register("default", Arc::new(SignalAdapter::new(signal_allow)));
    }
    let imessage_allow = string_list_at(config, "channels.imessage.allowFrom").await;
    if !imessage_allow.is_empty() || config.get_path("channels.imessage").await.is_some() {
        registry.register("default", Arc::new(IMessageAdapter::new(imessage_allow)));
    }

    registry
}

async fn load_routing(config: &ConfigDocument) -> RoutingConfig {
    let scope = match config.get_path("messages.session.scope").await.and_then(|v| v.as_str().map(str::to_string)).as_deref() {
        Some("global") => SessionScope::Global,
        _ => SessionScope::PerSender,
    };
    let main_key = config.get_path("messages.session.mainKey").await.and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "main".to_string());
    RoutingConfig { scope, main_key }
}

async fn load_auth(config: &ConfigDocument) -> AuthSettings {
    let mode = match config.get_path("auth.mode").await.and_then(|v| v.as_str().map(str::to_string)).as_deref() {
        Some("token") => AuthMode::Token,
        Some("password") => AuthMode::Password,
        Some("tailscale") => AuthMode::Tailscale,
        _ => AuthMode::None,
    };
    let token = string_at(config, "auth.token").await;
    let password = string_at(config, "auth.password").await;
    AuthSettings { mode, token, password }
}

/// Reads the single heartbeat config the spec's example uses (`agent.heartbeat.every` etc.),
/// targeting the routing's main session.
async fn load_heartbeat_config(config: &ConfigDocument, routing: &RoutingConfig) -> Option<HeartbeatConfig> {
    let every = string_at(config, "agent.heartbeat.every").await?;
    gateway_core::parse_interval(&every)?;
    let surface = string_at(config, "agent.heartbeat.surface").await.unwrap_or_else(|| "whatsapp".to_string());
    let account_id = string_at(config, "agent.heartbeat.accountId").await.unwrap_or_else(|| "default".to_string());
    let prompt = string_at(config, "agent.heartbeat.prompt").await.unwrap_or_else(|| "heartbeat".to_string());
    let target = match string_at(config, "agent.heartbeat.target").await.as_deref() {
        Some("last") => HeartbeatTarget::Last,
        Some(other) => HeartbeatTarget::Fixed(other.to_string()),
        None => HeartbeatTarget::None,
    };
    Some(HeartbeatConfig { session_key: routing.main_key.clone(), surface, account_id, target, prompt })
}

async fn load_cron_jobs(config: &ConfigDocument, cron: &CronScheduler) {
    let Some(Value::Array(jobs)) = config.get_path("cron").await else { return };
    for job in jobs {
        let Some(name) = job.get("name").and_then(Value::as_str) else { continue };
        let session_key = job.get("sessionKey").and_then(Value::as_str).unwrap_or("main").to_string();
        let surface = job.get("surface").and_then(Value::as_str).unwrap_or("webchat").to_string();
        let prompt = job.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string();
        let enabled = job.get("enabled").and_then(Value::as_bool).unwrap_or(true);
        let wake = match job.get("wake").and_then(Value::as_object) {
            Some(w) if w.get("mode").and_then(Value::as_str) == Some("at") => w
                .get("time")
                .and_then(Value::as_str)
                .and_then(|s| chrono::NaiveTime::parse_from_str(s, "%H:%M").ok())
                .map(WakeMode::At),
            Some(w) if w.get("mode").and_then(Value::as_str) == Some("cron") => w.get("expr").and_then(Value::as_str).map(|s| WakeMode::Cron(s.to_string())),
            Some(w) => w.get("seconds").and_then(Value::as_u64).map(|s| WakeMode::Every(std::time::Duration::from_secs(s))),
            None => None,
        };
        let Some(wake) = wake else { continue };
        cron.add_job(CronJob { name: name.to_string(), session_key, surface, prompt, wake, enabled }).await;
    }
}

async fn string_at(config: &ConfigDocument, path: &str) -> Option<String> {
    config.get_path(path).await.and_then(|v| v.as_str().map(str::to_string))
}

async fn string_list_at(config: &ConfigDocument, path: &str) -> Vec<String> {
    config.get_path(path).await.and_then(|v| v.as_array().cloned()).unwrap_or_default().into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
}

async fn i64_list_at(config: &ConfigDocument, path: &str) -> Vec<i64> {
    config
        .get_path(path)
        .await
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .collect()
}
