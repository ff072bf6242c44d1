pub mod chat;
pub mod config;
pub mod effect;
pub mod error;
pub mod fetch;
pub mod ffmpeg;
pub mod ffprobe;
pub mod job;
pub mod media;
pub mod orchestrator;
pub mod pipeline;
pub mod temp;

pub use chat::{Attachment, ChannelInfo, ChannelKind, ChannelRef, ChatClient, InboundRequest, MessageHandle, Permissions};
pub use config::BouncerConfig;
pub use effect::{effect_frame, EffectKind, FrameDescriptor, WaveParams};
pub use error::{ChatError, FetchError, IntakeError, JobError, MediaError};
pub use fetch::{Fetcher, HttpFetcher};
pub use ffmpeg::FfmpegTool;
pub use job::{Job, JobContext, JobStatus};
pub use media::MediaTool;
pub use orchestrator::{Orchestrator, SessionReport};
pub use temp::TempRoot;
