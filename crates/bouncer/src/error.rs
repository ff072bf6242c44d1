use std::path::PathBuf;
use thiserror::Error;

/// Result type for external media-tool operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Request rejected before any job is created
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("channel cannot receive files and text")]
    IneligibleChannel,

    #[error("request carries no attachments")]
    MissingAttachment,
}

/// Failure while downloading an attachment
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Failed to write download: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of an external media-tool stage
#[derive(Debug, Error)]
pub enum MediaError {
    /// Non-zero exit. `output` is the tool's stderr followed by its stdout, untouched.
    #[error("{stage} failed (exit code {exit_code}):\n{output}")]
    Tool {
        stage: &'static str,
        exit_code: i32,
        output: String,
    },

    #[error("{stage} timed out after {secs} seconds")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Could not start {bin}: {source}")]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unusable probe output: {0}")]
    Probe(String),

    #[error("No frames were decoded from {0}")]
    NoFrames(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything that can end a job in `Failed`
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Not a video")]
    UnsupportedType,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by the chat platform
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The platform refused the operation (size limit, missing permission, ...)
    #[error("{0}")]
    Rejected(String),

    #[error("chat platform unavailable: {0}")]
    Unavailable(String),
}

/// A job event that does not fit the job's current state
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job already finished as {0}")]
    Terminal(crate::job::JobStatus),

    #[error("{event} is not valid while {from}")]
    Invalid {
        from: crate::job::JobStatus,
        event: &'static str,
    },
}
