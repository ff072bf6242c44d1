use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use humansize::{format_size, DECIMAL};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;
use crate::chat::{
    resolve_destination, warning_channel, wrap, ChannelRef, ChatClient, InboundRequest, MessageHandle,
    MISSING_ATTACHMENT, MISSING_PERMISSIONS,
};
use crate::effect::EffectKind;
use crate::error::IntakeError;
use crate::job::{Job, JobContext, JobSnapshot, JobStatus, JobUpdate};

/// Reply when nothing survived to be delivered
pub const NO_SUCCESSFUL_RESULTS: &str = "No successful results";

/// Human status text for one job
pub fn status_text(snapshot: &JobSnapshot) -> String {
    match snapshot.status {
        JobStatus::Done => "Done".to_string(),
        JobStatus::Failed => format!("Failed: {}", snapshot.error.as_deref().unwrap_or("Unknown")),
        JobStatus::Processing => format!("Processing {}%", (snapshot.progress * 100.0).round() as i64),
        JobStatus::Rendering => "Rendering".to_string(),
        JobStatus::Downloading => "Downloading".to_string(),
    }
}

/// `{attachment name}: {status text}`
pub fn status_line(name: &str, snapshot: &JobSnapshot) -> String {
    format!("{}: {}", name, status_text(snapshot))
}

/// The whole status message, fenced
pub fn status_report(jobs: &[Job]) -> String {
    let lines: Vec<String> = jobs
        .iter()
        .map(|job| status_line(&job.attachment().name, &job.snapshot()))
        .collect();
    wrap(&format!("Status:\n{}", lines.join("\n")))
}

/// What to do about a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    EditNow,
    /// Edit once this instant is reached
    Defer(Instant),
}

/// Rate limit for edits of a single status message.
///
/// At most one deferred edit is ever pending; a new update while one is pending
/// just keeps the same deadline.
#[derive(Debug, Clone)]
pub struct StatusThrottle {
    interval: Duration,
    last_edit: Instant,
    pending: Option<Instant>,
}

impl StatusThrottle {
    /// `last_edit` is when the status message was first sent
    pub fn new(interval: Duration, last_edit: Instant) -> Self {
        StatusThrottle {
            interval,
            last_edit,
            pending: None,
        }
    }

    pub fn on_update(&mut self, now: Instant) -> ThrottleDecision {
        if now.saturating_duration_since(self.last_edit) >= self.interval {
            self.pending = None;
            ThrottleDecision::EditNow
        } else {
            let at = self.last_edit + self.interval;
            self.pending = Some(at);
            ThrottleDecision::Defer(at)
        }
    }

    /// Deadline of the deferred edit, if one is scheduled
    pub fn pending(&self) -> Option<Instant> {
        self.pending
    }

    /// Drop any deferred edit, e.g. because a forced edit is about to happen
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Record that an edit finished (successfully or not) at `now`
    pub fn edit_settled(&mut self, now: Instant) {
        self.last_edit = now;
        self.pending = None;
    }
}

/// Final state of one job as reported back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub delivered: bool,
}

/// Outcome of one inbound request
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub effect: EffectKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub jobs: Vec<JobSummary>,
}

impl SessionReport {
    /// `Total: N, Success: S, Failed: F`
    pub fn summary_line(&self) -> String {
        format!("Total: {}, Success: {}, Failed: {}", self.total, self.succeeded, self.failed)
    }
}

/// Runs one request from intake to delivery
pub struct Orchestrator {
    chat: Arc<dyn ChatClient>,
    ctx: Arc<JobContext>,
    status_interval: Duration,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn ChatClient>, ctx: Arc<JobContext>, status_interval: Duration) -> Self {
        Orchestrator {
            chat,
            ctx,
            status_interval,
        }
    }

    /// Process every attachment of `request`, keep a status message current, then
    /// deliver the results and clean up.
    ///
    /// Returns only once every job is terminal and cleared. Intake problems are
    /// reported before any job exists.
    pub async fn run(&self, request: InboundRequest) -> Result<SessionReport, IntakeError> {
        let session_id = Uuid::new_v4().to_string();

        let channel = match resolve_destination(&request.channel) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Session {}: rejecting request from {:?}: {}", session_id, request.channel.channel, e);
                if let Some(reply_to) = warning_channel(&request.channel) {
                    if let Err(send_err) = self.chat.send_text(&reply_to, MISSING_PERMISSIONS).await {
                        warn!("Session {}: could not send permissions warning: {}", session_id, send_err);
                    }
                }
                return Err(e);
            }
        };

        if request.attachments.is_empty() {
            if let Err(e) = self.chat.send_text(&channel, MISSING_ATTACHMENT).await {
                warn!("Session {}: could not send missing-attachment warning: {}", session_id, e);
            }
            return Err(IntakeError::MissingAttachment);
        }

        let effect = EffectKind::from_message(&request.text);
        info!(
            "📥 Session {}: {} attachment(s), effect {}",
            session_id,
            request.attachments.len(),
            effect.keyword()
        );

        let (updates_tx, updates) = mpsc::unbounded_channel();
        let jobs: Vec<Job> = request
            .attachments
            .into_iter()
            .enumerate()
            .map(|(index, attachment)| Job::start(index, attachment, effect, self.ctx.clone(), updates_tx.clone()))
            .collect();
        // only job tasks hold senders now, so the channel closes once they all finish
        drop(updates_tx);

        let mut status = match self.chat.send_text(&channel, &status_report(&jobs)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Session {}: could not send status message: {}", session_id, e);
                None
            }
        };

        self.track(&session_id, &jobs, &mut status, updates).await;

        // forced final edit so the message reflects the terminal state
        self.edit_status(&mut status, &jobs).await;

        let report = self.deliver(session_id, effect, &channel, &jobs).await;

        if let Some(message) = status.as_ref().filter(|m| m.deletable) {
            if let Err(e) = self.chat.delete_message(message).await {
                warn!("Session {}: failed to delete status message: {}", report.session_id, e);
            }
        }

        for job in &jobs {
            job.clear().await;
        }

        info!("🏁 Session {}: {}", report.session_id, report.summary_line());
        Ok(report)
    }

    /// Follow job updates with throttled status edits until every job is terminal.
    ///
    /// Everything happens on this one task, so an edit is always awaited before
    /// the next one can start.
    async fn track(
        &self,
        session_id: &str,
        jobs: &[Job],
        status: &mut Option<MessageHandle>,
        mut updates: mpsc::UnboundedReceiver<JobUpdate>,
    ) {
        let mut throttle = StatusThrottle::new(self.status_interval, Instant::now());

        while !all_terminal(jobs) {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(JobUpdate { index }) => {
                        debug!("Session {}: job {} updated", session_id, index);
                        if all_terminal(jobs) {
                            throttle.cancel_pending();
                            break;
                        }
                        if throttle.on_update(Instant::now()) == ThrottleDecision::EditNow {
                            self.edit_status(status, jobs).await;
                            throttle.edit_settled(Instant::now());
                        }
                    }
                    None => {
                        error!("Session {}: job updates stopped before every job finished", session_id);
                        break;
                    }
                },
                _ = sleep_until(throttle.pending().unwrap_or_else(Instant::now)), if throttle.pending().is_some() => {
                    self.edit_status(status, jobs).await;
                    throttle.edit_settled(Instant::now());
                }
            }
        }
    }

    /// Replace the status text; a failed edit is logged and the old handle kept
    async fn edit_status(&self, status: &mut Option<MessageHandle>, jobs: &[Job]) {
        let Some(message) = status.clone().filter(|m| m.editable) else {
            return;
        };
        match self.chat.edit_text(&message, &status_report(jobs)).await {
            Ok(handle) => *status = Some(handle),
            Err(e) => warn!("Failed to edit status message: {}", e),
        }
    }

    /// Upload every Done output and post the tally
    async fn deliver(&self, session_id: String, effect: EffectKind, channel: &ChannelRef, jobs: &[Job]) -> SessionReport {
        let mut summaries = Vec::with_capacity(jobs.len());
        let done = jobs.iter().filter(|job| job.status() == JobStatus::Done).count();

        for job in jobs {
            let snapshot = job.snapshot();
            let mut delivered = false;

            if done > 0 {
                if let (JobStatus::Done, Some(path)) = (snapshot.status, snapshot.output_path.as_ref()) {
                    match self.chat.send_files(channel, std::slice::from_ref(path)).await {
                        Ok(()) => delivered = true,
                        Err(e) => {
                            let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                            let warning = format!(
                                "Unable to send {} ({}): {}",
                                job.attachment().name,
                                format_size(size, DECIMAL),
                                e
                            );
                            warn!("Session {}: {}", session_id, warning);
                            if let Err(e) = self.chat.send_text(channel, &warning).await {
                                warn!("Session {}: could not send delivery warning: {}", session_id, e);
                            }
                        }
                    }
                }
            }

            summaries.push(JobSummary {
                id: job.id().to_string(),
                name: job.attachment().name.clone(),
                status: snapshot.status,
                error: snapshot.error,
                output_path: snapshot.output_path,
                delivered,
            });
        }

        let succeeded = summaries.iter().filter(|s| s.delivered).count();
        let report = SessionReport {
            session_id,
            effect,
            total: summaries.len(),
            succeeded,
            failed: summaries.len() - succeeded,
            jobs: summaries,
        };

        let closing = if done > 0 {
            report.summary_line()
        } else {
            NO_SUCCESSFUL_RESULTS.to_string()
        };
        if let Err(e) = self.chat.send_text(channel, &closing).await {
            warn!("Session {}: could not send summary: {}", report.session_id, e);
        }

        report
    }
}

fn all_terminal(jobs: &[Job]) -> bool {
    jobs.iter().all(|job| job.status().is_terminal())
}
