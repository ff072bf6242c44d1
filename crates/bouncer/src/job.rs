use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use crate::chat::Attachment;
use crate::effect::EffectKind;
use crate::error::{JobError, TransitionError};
use crate::fetch::Fetcher;
use crate::media::MediaTool;
use crate::pipeline::{FramePipeline, PipelineObserver};
use crate::temp::TempRoot;

/// Where a job is in its download → transform → deliver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Downloading,
    Processing,
    Rendering,
    Done,
    Failed,
}

impl JobStatus {
    /// Done and Failed never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Downloading => "Downloading",
            JobStatus::Processing => "Processing",
            JobStatus::Rendering => "Rendering",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Something that happened to a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Source bytes are on disk; transcoding begins
    Fetched,
    /// Fraction of frames encoded so far
    FrameProgress(f64),
    /// All frames encoded; concat/mux is running
    RenderingStarted,
    Completed(PathBuf),
    Failed(String),
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Fetched => "fetch completion",
            JobEvent::FrameProgress(_) => "frame progress",
            JobEvent::RenderingStarted => "rendering start",
            JobEvent::Completed(_) => "completion",
            JobEvent::Failed(_) => "failure",
        }
    }
}

/// Point-in-time view of a job, as published to the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: f64,
    /// Present iff status is Failed
    pub error: Option<String>,
    pub download_path: Option<PathBuf>,
    /// Present iff status is Done
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn new() -> Self {
        let now = Utc::now();
        JobSnapshot {
            status: JobStatus::Downloading,
            progress: 0.0,
            error: None,
            download_path: None,
            output_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `event`, or leave the snapshot untouched and say why not.
    ///
    /// Status only moves forward along Downloading → Processing → Rendering → Done;
    /// Failed is reachable from any non-terminal state. Progress never decreases
    /// except for the reset to 0 when processing begins.
    pub fn apply(&mut self, event: JobEvent) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        let invalid = TransitionError::Invalid {
            from: self.status,
            event: event.name(),
        };

        match (self.status, event) {
            (JobStatus::Downloading, JobEvent::Fetched) => {
                self.status = JobStatus::Processing;
                self.progress = 0.0;
            }
            (JobStatus::Processing, JobEvent::FrameProgress(fraction)) => {
                self.progress = self.progress.max(fraction.clamp(0.0, 1.0));
            }
            (JobStatus::Processing, JobEvent::RenderingStarted) => {
                self.status = JobStatus::Rendering;
                self.progress = 1.0;
            }
            (JobStatus::Processing | JobStatus::Rendering, JobEvent::Completed(path)) => {
                self.status = JobStatus::Done;
                self.progress = 1.0;
                self.output_path = Some(path);
            }
            (_, JobEvent::Failed(message)) => {
                self.status = JobStatus::Failed;
                self.error = Some(message);
            }
            _ => return Err(invalid),
        }

        self.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification that job `index` published a new snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobUpdate {
    pub index: usize,
}

/// Shared collaborators every job task needs
pub struct JobContext {
    pub temp: TempRoot,
    pub fetcher: Arc<dyn Fetcher>,
    pub media: Arc<dyn MediaTool>,
    pub bounces_per_second: f64,
}

/// One attachment's end-to-end transform.
///
/// The job's own task is the only writer of its state; this handle only reads it.
pub struct Job {
    id: String,
    index: usize,
    attachment: Attachment,
    state: watch::Receiver<JobSnapshot>,
    cancel_requested: Arc<AtomicBool>,
}

impl Job {
    /// Accept an attachment and, if it is a video, start downloading it in the background.
    ///
    /// Non-video attachments come back already Failed ("Not a video") and never touch
    /// the network.
    pub fn start(
        index: usize,
        attachment: Attachment,
        effect: EffectKind,
        ctx: Arc<JobContext>,
        updates: mpsc::UnboundedSender<JobUpdate>,
    ) -> Job {
        let id = Uuid::new_v4().to_string();
        let cancel_requested = Arc::new(AtomicBool::new(false));

        if !attachment.is_video() {
            info!(
                "Job {}: rejecting {} ({})",
                id,
                attachment.name,
                attachment.content_type.as_deref().unwrap_or("no content type")
            );
            let mut snapshot = JobSnapshot::new();
            let _ = snapshot.apply(JobEvent::Failed(JobError::UnsupportedType.to_string()));
            // the receiver keeps the last value after the sender is gone
            let (_, state) = watch::channel(snapshot);
            return Job {
                id,
                index,
                attachment,
                state,
                cancel_requested,
            };
        }

        debug!("Job {}: created for {} ({})", id, attachment.name, effect.keyword());
        let (sender, state) = watch::channel(JobSnapshot::new());
        let tracker = JobTracker {
            id: id.clone(),
            index,
            state: sender,
            updates,
        };
        tokio::spawn(run_job(ctx, attachment.clone(), effect, tracker));

        Job {
            id,
            index,
            attachment,
            state,
            cancel_requested,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.state.borrow().status
    }

    pub fn progress(&self) -> f64 {
        self.state.borrow().progress
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.state.borrow().output_path.clone()
    }

    /// Record that the requester wants this job stopped.
    ///
    /// Frame encoding is not preemptible, so the job keeps running to a terminal
    /// state; the intent is only kept for `cancel_requested`.
    pub fn cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            info!("Job {}: cancel requested for {}", self.id, self.attachment.name);
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Delete the downloaded source and the rendered output, if either exists.
    ///
    /// Safe to call any number of times; failures are logged and swallowed.
    pub async fn clear(&self) {
        let (download, output) = {
            let snapshot = self.state.borrow();
            (snapshot.download_path.clone(), snapshot.output_path.clone())
        };
        for path in download.iter().chain(output.iter()) {
            remove_quietly(&self.id, path).await;
        }
    }
}

async fn remove_quietly(job_id: &str, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Job {}: removed {}", job_id, path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Job {}: failed to remove {}: {}", job_id, path.display(), e),
    }
}

/// Task-side writer of a job's state
struct JobTracker {
    id: String,
    index: usize,
    state: watch::Sender<JobSnapshot>,
    updates: mpsc::UnboundedSender<JobUpdate>,
}

impl JobTracker {
    /// Apply an event and, if it took, tell the orchestrator
    fn apply(&mut self, event: JobEvent) {
        let mut outcome = Ok(());
        self.state.send_if_modified(|snapshot| {
            outcome = snapshot.apply(event);
            outcome.is_ok()
        });

        match outcome {
            Ok(()) => {
                let snapshot = self.state.borrow();
                debug!(
                    "Job {}: {} ({:.0}%)",
                    self.id,
                    snapshot.status,
                    snapshot.progress * 100.0
                );
                drop(snapshot);
                // a closed channel means nobody is watching any more
                let _ = self.updates.send(JobUpdate { index: self.index });
            }
            Err(e) => warn!("Job {}: ignored event: {}", self.id, e),
        }
    }

    fn set_download_path(&mut self, path: PathBuf) {
        self.state.send_modify(|snapshot| snapshot.download_path = Some(path));
    }
}

impl PipelineObserver for JobTracker {
    fn frame_progress(&mut self, fraction: f64) {
        self.apply(JobEvent::FrameProgress(fraction));
    }

    fn rendering_started(&mut self) {
        self.apply(JobEvent::RenderingStarted);
    }
}

async fn run_job(ctx: Arc<JobContext>, attachment: Attachment, effect: EffectKind, mut tracker: JobTracker) {
    match fetch_and_transform(&ctx, &attachment, effect, &mut tracker).await {
        Ok(output) => {
            info!("Job {}: {} done -> {}", tracker.id, attachment.name, output.display());
            tracker.apply(JobEvent::Completed(output));
        }
        Err(e) => {
            warn!("Job {}: {} failed: {}", tracker.id, attachment.name, e);
            tracker.apply(JobEvent::Failed(e.to_string()));
        }
    }
}

async fn fetch_and_transform(
    ctx: &JobContext,
    attachment: &Attachment,
    effect: EffectKind,
    tracker: &mut JobTracker,
) -> Result<PathBuf, JobError> {
    let (file_name, download_path) = ctx.temp.reserve_download(&attachment.name)?;
    tracker.set_download_path(download_path.clone());

    let bytes = ctx.fetcher.fetch_to(&attachment.url, &download_path).await?;
    debug!("Job {}: downloaded {} bytes to {}", tracker.id, bytes, download_path.display());
    tracker.apply(JobEvent::Fetched);

    let pipeline = FramePipeline::new(ctx.media.as_ref(), &ctx.temp, effect, ctx.bounces_per_second);
    let output = pipeline.run(&download_path, &file_name, tracker).await?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use async_trait::async_trait;
    use crate::effect::FrameDescriptor;
    use crate::error::{FetchError, MediaError, MediaResult};
    use crate::ffprobe::VideoInfo;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch_to(&self, _url: &str, dest: &Path) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_with {
                return Err(FetchError::Status {
                    status,
                    body: "{\"message\": \"Unknown Attachment\"}".to_string(),
                });
            }
            tokio::fs::write(dest, b"video").await?;
            Ok(5)
        }
    }

    /// Never reached by these tests
    struct UnreachableTool;

    #[async_trait]
    impl MediaTool for UnreachableTool {
        async fn probe(&self, _input: &Path) -> MediaResult<VideoInfo> {
            Err(MediaError::Probe("not expected".to_string()))
        }
        async fn extract_audio(&self, _input: &Path, _audio_out: &Path) -> MediaResult<()> {
            unreachable!()
        }
        async fn decode_frames(&self, _input: &Path, _frame_pattern: &Path) -> MediaResult<()> {
            unreachable!()
        }
        async fn encode_frame(&self, _frame: &FrameDescriptor, _frame_rate: &str, _clip_out: &Path) -> MediaResult<()> {
            unreachable!()
        }
        async fn concat(&self, _manifest: &Path, _audio: Option<&Path>, _output: &Path) -> MediaResult<()> {
            unreachable!()
        }
    }

    fn context(dir: &Path, fetcher: Arc<CountingFetcher>) -> Arc<JobContext> {
        Arc::new(JobContext {
            temp: TempRoot::init(dir.join("temp")).unwrap(),
            fetcher,
            media: Arc::new(UnreachableTool),
            bounces_per_second: 1.9,
        })
    }

    fn attachment(name: &str, content_type: &str) -> Attachment {
        Attachment {
            name: name.to_string(),
            url: format!("https://cdn.example/{}", name),
            content_type: Some(content_type.to_string()),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = JobSnapshot::new();
        assert_eq!(s.status, JobStatus::Downloading);

        s.apply(JobEvent::Fetched).unwrap();
        assert_eq!((s.status, s.progress), (JobStatus::Processing, 0.0));

        s.apply(JobEvent::FrameProgress(0.5)).unwrap();
        s.apply(JobEvent::FrameProgress(0.25)).unwrap();
        assert_eq!(s.progress, 0.5, "progress never goes backwards");

        s.apply(JobEvent::RenderingStarted).unwrap();
        assert_eq!(s.status, JobStatus::Rendering);

        s.apply(JobEvent::Completed(PathBuf::from("/o/a.webm"))).unwrap();
        assert_eq!(s.status, JobStatus::Done);
        assert_eq!(s.output_path, Some(PathBuf::from("/o/a.webm")));
        assert!(s.error.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut done = JobSnapshot::new();
        done.apply(JobEvent::Fetched).unwrap();
        done.apply(JobEvent::Completed(PathBuf::from("/o/a.webm"))).unwrap();
        for event in [
            JobEvent::Fetched,
            JobEvent::FrameProgress(0.1),
            JobEvent::RenderingStarted,
            JobEvent::Completed(PathBuf::from("/o/b.webm")),
            JobEvent::Failed("late".to_string()),
        ] {
            assert_eq!(done.apply(event), Err(TransitionError::Terminal(JobStatus::Done)));
        }
        assert_eq!(done.output_path, Some(PathBuf::from("/o/a.webm")));
        assert!(done.error.is_none());

        let mut failed = JobSnapshot::new();
        failed.apply(JobEvent::Failed("boom".to_string())).unwrap();
        assert!(failed.apply(JobEvent::Completed(PathBuf::from("/o/a.webm"))).is_err());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.output_path.is_none());
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        let mut s = JobSnapshot::new();
        assert!(matches!(s.apply(JobEvent::FrameProgress(0.3)), Err(TransitionError::Invalid { .. })));
        assert!(s.apply(JobEvent::Completed(PathBuf::from("/x"))).is_err());
        assert_eq!(s.status, JobStatus::Downloading);

        s.apply(JobEvent::Fetched).unwrap();
        s.apply(JobEvent::RenderingStarted).unwrap();
        assert!(s.apply(JobEvent::Fetched).is_err());
        assert!(s.apply(JobEvent::FrameProgress(0.9)).is_err());
        assert_eq!(s.status, JobStatus::Rendering);
    }

    #[tokio::test]
    async fn test_non_video_fails_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail_with: None });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let job = Job::start(0, attachment("cat.png", "image/png"), EffectKind::Bounce, context(dir.path(), fetcher.clone()), tx);

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().as_deref(), Some("Not a video"));
        assert!(job.output_path().is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        // no task was spawned, so the update channel just closes
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_job_failed_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail_with: Some(404) });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let job = Job::start(3, attachment("clip.mp4", "video/mp4"), EffectKind::Bounce, context(dir.path(), fetcher), tx);

        assert_eq!(rx.recv().await, Some(JobUpdate { index: 3 }));
        assert!(rx.recv().await.is_none());
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("HTTP 404"));

        job.clear().await;
        assert_eq!(std::fs::read_dir(dir.path().join("temp/downloads")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_after_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail_with: None });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let job = Job::start(0, attachment("clip.mp4", "video/mp4"), EffectKind::Bounce, context(dir.path(), fetcher), tx);

        let mut updates = 0;
        while rx.recv().await.is_some() {
            updates += 1;
        }
        // Processing, then Failed
        assert_eq!(updates, 2);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("not expected"));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let download = dir.path().join("clip.mp4");
        let output = dir.path().join("clip.webm");
        std::fs::write(&download, b"in").unwrap();
        std::fs::write(&output, b"out").unwrap();

        let mut snapshot = JobSnapshot::new();
        snapshot.download_path = Some(download.clone());
        snapshot.apply(JobEvent::Fetched).unwrap();
        snapshot.apply(JobEvent::Completed(output.clone())).unwrap();
        let (_, state) = watch::channel(snapshot);
        let job = Job {
            id: "job".to_string(),
            index: 0,
            attachment: attachment("clip.mp4", "video/mp4"),
            state,
            cancel_requested: Arc::new(AtomicBool::new(false)),
        };

        job.clear().await;
        job.clear().await;
        assert!(!download.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_cancel_only_records_intent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher { calls: AtomicUsize::new(0), fail_with: None });
        let (tx, _rx) = mpsc::unbounded_channel();
        let job = Job::start(0, attachment("a.gif", "image/gif"), EffectKind::Bounce, context(dir.path(), fetcher), tx);

        assert!(!job.cancel_requested());
        job.cancel();
        job.cancel();
        assert!(job.cancel_requested());
        assert_eq!(job.status(), JobStatus::Failed);
    }
}
