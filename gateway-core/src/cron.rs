//! Cron Scheduler (spec §4 component K): named jobs that wake on an
//! interval, a fixed time, or (eventually) a cron expression, re-entering
//! the scheduler at F with a synthesized envelope exactly like a heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use channels::Registry;
use envelope::{ChatType, Envelope};
use session::SessionKey;

use crate::scheduler::Scheduler;

/// `cron.<name>.wake` (spec §4 component K "wake modes").
#[derive(Clone, Debug)]
pub enum WakeMode {
    Every(Duration),
    At(chrono::NaiveTime),
    /// Standard 5-field cron expression. Evaluation isn't implemented yet —
    /// jobs using this mode register but never fire until a cron-expression
    /// evaluator is wired in.
    Cron(String),
}

#[derive(Clone, Debug)]
pub struct CronJob {
    pub name: String,
    pub session_key: SessionKey,
    pub surface: String,
    pub prompt: String,
    pub wake: WakeMode,
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CronRunStatus {
    Delivered,
    Suppressed,
    Skipped,
}

#[derive(Clone, Debug)]
pub struct CronRunRecord {
    pub job_name: String,
    pub ran_at: chrono::DateTime<chrono::Utc>,
    pub status: CronRunStatus,
}

struct JobState {
    job: CronJob,
    last_run: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct CronScheduler {
    scheduler: Arc<Scheduler>,
    registry: Arc<Registry>,
    jobs: Mutex<Vec<JobState>>,
    log: Mutex<Vec<CronRunRecord>>,
}

impl CronScheduler {
    pub fn new(scheduler: Arc<Scheduler>, registry: Arc<Registry>) -> Self {
        Self { scheduler, registry, jobs: Mutex::new(Vec::new()), log: Mutex::new(Vec::new()) }
    }

    pub async fn add_job(&self, job: CronJob) {
        self.jobs.lock().await.push(JobState { job, last_run: None });
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.jobs.lock().await.iter().map(|s| s.job.clone()).collect()
    }

    pub async fn run_log(&self) -> Vec<CronRunRecord> {
        self.log.lock().await.clone()
    }

    /// `cron.run`: force one job to fire immediately regardless of its wake
    /// schedule.
    pub async fn run_now(&self, job_name: &str) -> Option<CronRunStatus> {
        let job = {
            let jobs = self.jobs.lock().await;
            jobs.iter().find(|s| s.job.name == job_name).map(|s| s.job.clone())?
        };
        Some(self.fire(&job).await)
    }

    /// Polled by a timer loop owned by the caller; fires every job whose
    /// wake condition is due since its last run.
    pub async fn tick(&self, now: chrono::DateTime<chrono::Utc>) {
        let due: Vec<CronJob> = {
            let jobs = self.jobs.lock().await;
            jobs.iter().filter(|s| s.job.enabled && is_due(&s.job.wake, s.last_run, now)).map(|s| s.job.clone()).collect()
        };
        for job in due {
            let status = self.fire(&job).await;
            let mut jobs = self.jobs.lock().await;
            if let Some(state) = jobs.iter_mut().find(|s| s.job.name == job.name) {
                state.last_run = Some(now);
            }
            drop(jobs);
            let _ = status;
        }
    }

    async fn fire(&self, job: &CronJob) -> CronRunStatus {
        let envelope = synthesize_envelope(job);
        let adapter = self.registry.get_by_surface(&job.surface, "default");
        let target = adapter.as_ref().and_then(|a| a.resolve_target(&envelope, a.delivery_mode()).ok());

        let status = match self.scheduler.run_now(job.session_key.clone(), envelope).await {
            Some(Ok(out)) => match out.last_non_empty() {
                Some(reply) => match (&adapter, &target) {
                    (Some(adapter), Some(target)) => {
                        let media = out
                            .media
                            .iter()
                            .map(|m| crate::delivery::MediaItem { url_or_path: m.clone(), caption: None })
                            .collect();
                        let outbound = crate::delivery::OutboundJob { payloads: vec![reply.to_string()], media };
                        crate::delivery::deliver(adapter.as_ref(), target, outbound).await;
                        CronRunStatus::Delivered
                    }
                    // No adapter registered for this surface, or the surface
                    // couldn't resolve a recipient (e.g. webchat with no
                    // live connection) — nothing was actually sent.
                    _ => CronRunStatus::Skipped,
                },
                None => CronRunStatus::Suppressed,
            },
            Some(Err(_)) | None => CronRunStatus::Skipped,
        };
        self.log.lock().await.push(CronRunRecord { job_name: job.name.clone(), ran_at: chrono::Utc::now(), status });
        status
    }
}

fn is_due(wake: &WakeMode, last_run: Option<chrono::DateTime<chrono::Utc>>, now: chrono::DateTime<chrono::Utc>) -> bool {
    match wake {
        WakeMode::Every(interval) => match last_run {
            None => true,
            Some(prev) => now - prev >= chrono::Duration::from_std(*interval).unwrap_or(chrono::Duration::zero()),
        },
        WakeMode::At(time) => {
            let already_ran_today = last_run.is_some_and(|prev| prev.date_naive() == now.date_naive());
            now.time() >= *time && !already_ran_today
        }
        WakeMode::Cron(_) => false,
    }
}

fn synthesize_envelope(job: &CronJob) -> Envelope {
    Envelope {
        raw_body: job.prompt.clone(),
        command_body: job.prompt.clone(),
        reply_to: None,
        surface: job.surface.clone(),
        from: "cron".to_string(),
        to: job.session_key.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentEngine, AgentInput, AgentOutput, EventSink};
    use crate::error::GatewayError;

    struct EchoEngine;
    #[async_trait::async_trait]
    impl AgentEngine for EchoEngine {
        async fn run(&self, input: AgentInput, _on_event: EventSink) -> Result<AgentOutput, GatewayError> {
            Ok(AgentOutput { payloads: vec![input.message], ..Default::default() })
        }
    }

    async fn scheduler() -> Arc<Scheduler> {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(session::SessionStore::open(dir.path().join("s.json")).await.unwrap());
        let (terminal_tx, _rx1) = tokio::sync::mpsc::unbounded_channel();
        let (stream_tx, _rx2) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Scheduler::new(Arc::new(EchoEngine), sessions, terminal_tx, stream_tx))
    }

    fn registry_with_webchat() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register("default", Arc::new(channels::WebChatAdapter::new()));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn run_now_logs_a_delivered_record() {
        let cron = CronScheduler::new(scheduler().await, registry_with_webchat());
        cron.add_job(CronJob {
            name: "morning-digest".to_string(),
            session_key: "main".to_string(),
            surface: "webchat".to_string(),
            prompt: "summarize overnight activity".to_string(),
            wake: WakeMode::Every(Duration::from_secs(3600)),
            enabled: true,
        })
        .await;

        let status = cron.run_now("morning-digest").await.unwrap();
        assert_eq!(status, CronRunStatus::Delivered);
        assert_eq!(cron.run_log().await.len(), 1);
    }

    #[tokio::test]
    async fn run_now_on_unknown_job_returns_none() {
        let cron = CronScheduler::new(scheduler().await, registry_with_webchat());
        assert!(cron.run_now("missing").await.is_none());
    }

    #[test]
    fn every_job_is_due_on_first_run_only_once_interval_elapses() {
        let now = chrono::Utc::now();
        assert!(is_due(&WakeMode::Every(Duration::from_secs(60)), None, now));
        assert!(!is_due(&WakeMode::Every(Duration::from_secs(60)), Some(now), now));
    }

    #[test]
    fn cron_expression_jobs_never_fire_yet() {
        assert!(!is_due(&WakeMode::Cron("0 9 * * *".to_string()), None, chrono::Utc::now()));
    }
}
