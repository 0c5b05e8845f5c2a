//! RPC dispatch: one `method` string to one handler, namespaced exactly as
//! spec §4.4 describes (`chat.*`, `nodes.*`, `sessions.*`, `config.*`,
//! `providers.*`, `cron.*`, `skills.*`, `channels.*`, `web.login.*`,
//! `pairing.*`, `health`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use envelope::{ApprovalDecision, ChatType, Directive, Envelope, GroupActivationDirective, MediaRef, ThinkingOrVerboseLevel};
use gateway_core::{GateDecision, QueueMode};
use protocol::RpcError;
use session::{Role, TranscriptRecord};

use crate::app::GatewayState;

const EXPECT_FINAL_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn dispatch(state: &Arc<GatewayState>, req: &protocol::RpcRequest) -> Result<Value, RpcError> {
    match req.method.as_str() {
        "health" => handle_health(state).await,
        "chat.history" => handle_chat_history(state, &req.params).await,
        "chat.send" => handle_chat_send(state, &req.params, req.expect_final).await,
        "chat.abort" => handle_chat_abort(state, &req.params).await,
        "sessions.list" => handle_sessions_list(state).await,
        "sessions.patch" => handle_sessions_patch(state, &req.params).await,
        "nodes.list" => handle_nodes_list(state, &req.params).await,
        "providers.status" => handle_providers_status(state).await,
        "channels.status" => handle_channels_status(state).await,
        "channels.logout" => handle_channels_logout(state, &req.params).await,
        "config.get" => handle_config_get(state, &req.params).await,
        "config.put" => handle_config_put(state, &req.params).await,
        "cron.list" => handle_cron_list(state).await,
        "cron.status" => handle_cron_status(state).await,
        "cron.run" => handle_cron_run(state, &req.params).await,
        "skills.list" => handle_skills_list(state).await,
        "web.login.start" => handle_web_login_start(state, &req.params).await,
        "web.login.wait" => handle_web_login_wait(state, &req.params).await,
        "pairing.list" => handle_pairing_list(state).await,
        "pairing.approve" => handle_pairing_approve(state, &req.params).await,
        other => Err(err("not-found", format!("unknown method {other:?}"))),
    }
}

fn err(code: &str, message: impl Into<String>) -> RpcError {
    RpcError { code: code.to_string(), message: message.into(), field_path: None }
}

fn field_err(field: &str) -> RpcError {
    RpcError { code: "invalid-input".to_string(), message: format!("missing or malformed field {field:?}"), field_path: Some(field.to_string()) }
}

fn gateway_err(e: gateway_core::GatewayError) -> RpcError {
    let code = serde_json::to_value(e.kind()).ok().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "internal".to_string());
    RpcError { code, message: e.to_string(), field_path: None }
}

fn channel_err(e: channels::ChannelError) -> RpcError {
    gateway_err(gateway_core::GatewayError::from(e))
}

fn param_str(params: &Option<Value>, field: &str) -> Result<String, RpcError> {
    params
        .as_ref()
        .and_then(|p| p.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| field_err(field))
}

fn param_str_opt(params: &Option<Value>, field: &str) -> Option<String> {
    params.as_ref().and_then(|p| p.get(field)).and_then(Value::as_str).map(str::to_string)
}

async fn handle_health(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    Ok(json!({
        "healthy": true,
        "protocolVersion": protocol::PROTOCOL_VERSION,
        "connectedNodes": state.nodes.list(Some(nodes::NodeStatus::Paired)).await.map(|v| v.len()).unwrap_or(0),
    }))
}

async fn handle_chat_history(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let session_key = param_str(params, "sessionKey")?;
    let limit = params.as_ref().and_then(|p| p.get("limit")).and_then(Value::as_u64).unwrap_or(50) as usize;
    let records = state.transcripts.read(&session_key, limit).await.map_err(|e| err("internal", e.to_string()))?;
    let messages: Vec<Value> = records
        .into_iter()
        .map(|r| json!({"role": r.role, "text": r.text, "ts": r.ts}))
        .collect();
    Ok(json!({"messages": messages}))
}

/// `chat.send`: resolves the session key, short-circuits on a leading
/// `/directive`, otherwise runs the envelope through the policy gate and
/// dispatches a Run (spec §4.2 step 6, §4.3, §2 component F).
async fn handle_chat_send(state: &Arc<GatewayState>, params: &Option<Value>, expect_final: bool) -> Result<Value, RpcError> {
    let text = param_str(params, "text")?;
    let surface = param_str_opt(params, "surface").unwrap_or_else(|| "webchat".to_string());
    let account_id = param_str_opt(params, "accountId").unwrap_or_else(|| "default".to_string());

    let envelope = Envelope {
        raw_body: text.clone(),
        command_body: text,
        reply_to: None,
        surface: surface.clone(),
        from: param_str_opt(params, "from").unwrap_or_else(|| "web".to_string()),
        to: param_str_opt(params, "to").unwrap_or_else(|| "main".to_string()),
        chat_type: ChatType::Direct,
        group_subject: None,
        group_members: None,
        room: None,
        space: None,
        sender_name: param_str_opt(params, "senderName"),
        sender_identity: None,
        message_id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
        media: param_str_opt(params, "mediaUrl").map(|url| MediaRef { url: Some(url), ..Default::default() }),
        was_mentioned: true,
        thread_id: None,
        media_urls: vec![],
        reply_target_id: None,
    };
    envelope.validate().map_err(|e| err("invalid-input", e.to_string()))?;

    let session_key = session::resolve_session_key(&envelope, state.routing.scope, &state.routing.main_key);

    if let Some(directive) = Directive::parse(&envelope.command_body) {
        return handle_directive(state, &session_key, directive).await;
    }

    let policy = channel_policy_for(state, &surface, &account_id);
    match state.policy.check(&envelope, &policy).await {
        GateDecision::Reject(reason) => return Err(err("rejected", reason)),
        GateDecision::StoreAsContext => {
            record_user_turn(state, &session_key, &envelope.raw_body).await?;
            return Ok(json!({"accepted": false, "reason": "stored-as-context"}));
        }
        GateDecision::Admit => {}
    }

    record_user_turn(state, &session_key, &envelope.raw_body).await?;

    if !expect_final {
        state.scheduler.enqueue(session_key.clone(), envelope, QueueMode::Followup).await;
        return Ok(json!({"accepted": true, "sessionKey": session_key}));
    }

    // Subscribe before enqueuing so the terminal event can't fire and be
    // missed between dispatch and subscription.
    let mut terminal_rx = state.terminal_events.subscribe();
    state.scheduler.enqueue(session_key.clone(), envelope, QueueMode::Followup).await;

    let wait = async {
        loop {
            match terminal_rx.recv().await {
                Ok(ev) if ev.session_key == session_key && ev.state.is_terminal() => return Some(ev),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    };

    match timeout(EXPECT_FINAL_TIMEOUT, wait).await {
        Ok(Some(ev)) => {
            if let Some(output) = &ev.output {
                if let Some(reply) = output.last_non_empty() {
                    record_assistant_turn(state, &session_key, reply).await?;
                }
            }
            Ok(json!({
                "accepted": true,
                "sessionKey": session_key,
                "runId": ev.run_id,
                "state": format!("{:?}", ev.state).to_lowercase(),
                "output": crate::events::agent_output_to_json(ev.output.as_ref()),
                "error": ev.error,
            }))
        }
        Ok(None) => Err(err("internal", "terminal event channel closed")),
        Err(_) => Err(err("transient-network", "timed out waiting for terminal event")),
    }
}

async fn record_user_turn(state: &Arc<GatewayState>, session_key: &str, text: &str) -> Result<(), RpcError> {
    let record = TranscriptRecord { role: Role::User, text: text.to_string(), ts: chrono::Utc::now() };
    state.transcripts.append(session_key, &record).await.map_err(|e| err("internal", e.to_string()))
}

async fn record_assistant_turn(state: &Arc<GatewayState>, session_key: &str, text: &str) -> Result<(), RpcError> {
    let record = TranscriptRecord { role: Role::Assistant, text: text.to_string(), ts: chrono::Utc::now() };
    state.transcripts.append(session_key, &record).await.map_err(|e| err("internal", e.to_string()))
}

/// Builds a [`gateway_core::ChannelPolicy`] from the adapter's security
/// surface. Group allowlists reuse `ConfigSurface::resolve_allow_from`
/// since the adapter trait doesn't expose a separate group-membership
/// accessor; adapters that need a distinct list can still reject in
/// `resolve_group_policy` by returning `Disabled`.
fn channel_policy_for(state: &Arc<GatewayState>, surface: &str, account_id: &str) -> gateway_core::ChannelPolicy {
    let Some(adapter) = state.registry.get_by_surface(surface, account_id) else {
        return gateway_core::ChannelPolicy::default();
    };
    let allow_from = adapter.resolve_allow_from(account_id);
    let dm = match adapter.resolve_dm_policy(account_id) {
        channels::DmPolicy::Open => gateway_core::DmPolicy::Open,
        channels::DmPolicy::Allowlist => gateway_core::DmPolicy::Allowlist(allow_from.clone()),
        channels::DmPolicy::Pairing => gateway_core::DmPolicy::Pairing(allow_from.clone()),
    };
    let group = match adapter.resolve_group_policy(account_id) {
        channels::GroupPolicy::Open => gateway_core::GroupPolicy::Open,
        channels::GroupPolicy::Disabled => gateway_core::GroupPolicy::Disabled,
        channels::GroupPolicy::Allowlist => gateway_core::GroupPolicy::Allowlist(allow_from),
    };
    gateway_core::ChannelPolicy { dm, group, mention: gateway_core::MentionConfig::default() }
}

async fn handle_directive(state: &Arc<GatewayState>, session_key: &str, directive: Directive) -> Result<Value, RpcError> {
    match directive {
        Directive::New | Directive::Reset => {
            state.sessions.remove(session_key).await.map_err(|e| err("internal", e.to_string()))?;
            Ok(json!({"accepted": true, "directive": "reset"}))
        }
        Directive::Thinking(level) => {
            state
                .sessions
                .update(session_key, |e| e.thinking_level = Some(level_str(level).to_string()))
                .await
                .map_err(|e| err("internal", e.to_string()))?;
            Ok(json!({"accepted": true, "directive": "thinking", "level": level_str(level)}))
        }
        Directive::Verbose(level) => {
            state
                .sessions
                .update(session_key, |e| e.verbose_level = Some(level_str(level).to_string()))
                .await
                .map_err(|e| err("internal", e.to_string()))?;
            Ok(json!({"accepted": true, "directive": "verbose", "level": level_str(level)}))
        }
        Directive::Activation(activation) => {
            let enabled = matches!(activation, GroupActivationDirective::Enable);
            state
                .sessions
                .update(session_key, |e| e.group_activation = enabled)
                .await
                .map_err(|e| err("internal", e.to_string()))?;
            Ok(json!({"accepted": true, "directive": "activation", "enabled": enabled}))
        }
        Directive::Approve { code, decision } => match decision {
            ApprovalDecision::Deny => Ok(json!({"accepted": true, "directive": "approve", "decision": "deny"})),
            ApprovalDecision::Allow | ApprovalDecision::Always => {
                let request = state.policy.pairing().approve(&code).await.map_err(|e| err("not-found", e.to_string()))?;
                Ok(json!({
                    "accepted": true,
                    "directive": "approve",
                    "decision": if matches!(decision, ApprovalDecision::Always) { "always" } else { "allow" },
                    "channel": request.channel,
                    "peer": request.peer,
                }))
            }
        },
        Directive::Unknown(word) => Err(err("invalid-input", format!("unknown directive /{word}"))),
    }
}

fn level_str(level: ThinkingOrVerboseLevel) -> &'static str {
    match level {
        ThinkingOrVerboseLevel::Off => "off",
        ThinkingOrVerboseLevel::Low => "low",
        ThinkingOrVerboseLevel::High => "high",
    }
}

async fn handle_chat_abort(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let session_key = param_str(params, "sessionKey")?;
    state.scheduler.abort(&session_key).await;
    Ok(json!({"accepted": true}))
}

async fn handle_sessions_list(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let snapshot = state.sessions.snapshot().await;
    let mut sessions = Vec::with_capacity(snapshot.len());
    for (key, entry) in snapshot {
        let run_state = state.scheduler.run_state(&key).await.map(|s| format!("{s:?}").to_lowercase());
        sessions.push(json!({"sessionKey": key, "entry": entry, "runState": run_state}));
    }
    Ok(json!({"sessions": sessions}))
}

async fn handle_sessions_patch(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let session_key = param_str(params, "sessionKey")?;
    let patch = params.as_ref().and_then(|p| p.get("patch")).cloned().unwrap_or(Value::Null);
    let entry = state
        .sessions
        .update(&session_key, |e| {
            if let Some(v) = patch.get("lastChannel").and_then(Value::as_str) {
                e.set_last_channel(v);
            }
            if let Some(v) = patch.get("abortedLastRun").and_then(Value::as_bool) {
                e.aborted_last_run = v;
            }
            if let Some(v) = patch.get("groupActivation").and_then(Value::as_bool) {
                e.group_activation = v;
            }
        })
        .await
        .map_err(|e| err("internal", e.to_string()))?;
    Ok(json!({"sessionKey": session_key, "entry": entry}))
}

async fn handle_nodes_list(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let status = param_str_opt(params, "status").map(|s| match s.as_str() {
        "paired" => nodes::NodeStatus::Paired,
        _ => nodes::NodeStatus::Pending,
    });
    let list = state.nodes.list(status).await.map_err(|e| err("internal", e.to_string()))?;
    Ok(json!({"nodes": list}))
}

async fn handle_providers_status(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let models = state.config.parsed_models().await;
    let providers: Vec<Value> = models
        .into_iter()
        .map(|m| json!({"id": m.id, "provider": format!("{:?}", m.provider).to_lowercase()}))
        .collect();
    Ok(json!({"providers": providers}))
}

async fn handle_channels_status(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let mut channels = Vec::new();
    for ((kind, account_id), adapter) in state.registry.iter() {
        channels.push(json!({
            "surface": kind.id(),
            "accountId": account_id,
            "status": format!("{:?}", adapter.probe(account_id).await).to_lowercase(),
            "summary": adapter.build_account_snapshot(account_id),
        }));
    }
    Ok(json!({"channels": channels}))
}

async fn handle_channels_logout(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let surface = param_str(params, "surface")?;
    let account_id = param_str_opt(params, "accountId").unwrap_or_else(|| "default".to_string());
    let adapter = state.registry.get_by_surface(&surface, &account_id).ok_or_else(|| err("not-found", "no such channel account"))?;
    adapter.logout_account(&account_id).await.map_err(channel_err)?;
    Ok(json!({"accepted": true}))
}

async fn handle_config_get(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let path = param_str(params, "path")?;
    let value = state.config.get_path(&path).await;
    Ok(json!({"path": path, "value": value}))
}

async fn handle_config_put(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let path = param_str(params, "path")?;
    let value = params.as_ref().and_then(|p| p.get("value")).cloned().ok_or_else(|| field_err("value"))?;
    let root = state.config.put_path(&path, value).await.map_err(|e| err("internal", e.to_string()))?;
    Ok(json!({"path": path, "changedRoot": root}))
}

async fn handle_cron_list(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let jobs = state.cron.list_jobs().await;
    Ok(json!({"jobs": jobs.iter().map(job_to_json).collect::<Vec<_>>()}))
}

async fn handle_cron_status(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let log = state.cron.run_log().await;
    Ok(json!({"runs": log.iter().map(run_record_to_json).collect::<Vec<_>>()}))
}

async fn handle_cron_run(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let name = param_str(params, "name")?;
    match state.cron.run_now(&name).await {
        Some(status) => Ok(json!({"job": name, "status": cron_status_str(status)})),
        None => Err(err("not-found", format!("no cron job named {name:?}"))),
    }
}

fn job_to_json(job: &gateway_core::CronJob) -> Value {
    json!({
        "name": job.name,
        "sessionKey": job.session_key,
        "surface": job.surface,
        "prompt": job.prompt,
        "wake": wake_to_json(&job.wake),
        "enabled": job.enabled,
    })
}

fn wake_to_json(wake: &gateway_core::WakeMode) -> Value {
    match wake {
        gateway_core::WakeMode::Every(d) => json!({"mode": "every", "seconds": d.as_secs()}),
        gateway_core::WakeMode::At(t) => json!({"mode": "at", "time": t.to_string()}),
        gateway_core::WakeMode::Cron(expr) => json!({"mode": "cron", "expr": expr}),
    }
}

fn run_record_to_json(record: &gateway_core::CronRunRecord) -> Value {
    json!({"jobName": record.job_name, "ranAt": record.ran_at, "status": cron_status_str(record.status)})
}

fn cron_status_str(status: gateway_core::CronRunStatus) -> &'static str {
    match status {
        gateway_core::CronRunStatus::Delivered => "delivered",
        gateway_core::CronRunStatus::Suppressed => "suppressed",
        gateway_core::CronRunStatus::Skipped => "skipped",
    }
}

/// `skills.list`: merges the statically configured `skills` config root
/// with whatever tool specs registered channel adapters expose through
/// `AgentToolsSurface` (spec §6 config schema "skills" root; §4.1 optional
/// agent-tools surface).
async fn handle_skills_list(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let configured = state.config.get_path("skills").await.unwrap_or(Value::Null);
    let mut tool_specs = Vec::new();
    for (_, adapter) in state.registry.iter() {
        if let Some(tools) = adapter.agent_tools() {
            tool_specs.extend(tools.tool_specs());
        }
    }
    Ok(json!({"configured": configured, "toolSpecs": tool_specs}))
}

async fn handle_web_login_start(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let surface = param_str(params, "surface")?;
    let account_id = param_str_opt(params, "accountId").unwrap_or_else(|| "default".to_string());
    let adapter = state.registry.get_by_surface(&surface, &account_id).ok_or_else(|| err("not-found", "no such channel account"))?;
    let qr = adapter.login_with_qr_start(&account_id).await.map_err(channel_err)?;
    Ok(json!({"qr": qr}))
}

async fn handle_web_login_wait(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let surface = param_str(params, "surface")?;
    let account_id = param_str_opt(params, "accountId").unwrap_or_else(|| "default".to_string());
    let adapter = state.registry.get_by_surface(&surface, &account_id).ok_or_else(|| err("not-found", "no such channel account"))?;
    adapter.login_with_qr_wait(&account_id).await.map_err(channel_err)?;
    Ok(json!({"linked": true}))
}

async fn handle_pairing_list(state: &Arc<GatewayState>) -> Result<Value, RpcError> {
    let list = state.policy.pairing().list().await;
    Ok(json!({"requests": list}))
}

async fn handle_pairing_approve(state: &Arc<GatewayState>, params: &Option<Value>) -> Result<Value, RpcError> {
    let code = param_str(params, "code")?;
    let request = state.policy.pairing().approve(&code).await.map_err(|e| err("not-found", e.to_string()))?;
    Ok(json!({"channel": request.channel, "peer": request.peer}))
}
