use std::path::Path;
use async_trait::async_trait;
use crate::effect::FrameDescriptor;
use crate::error::MediaResult;
use crate::ffprobe::VideoInfo;

/// The external media tool, one method per command template.
///
/// Every call is a separate process run to completion; a non-zero exit comes
/// back as `MediaError::Tool` with the tool's own output.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Width, height and frame rate of the first video stream
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo>;

    /// Copy the audio track into a Vorbis/WebM file
    async fn extract_audio(&self, input: &Path, audio_out: &Path) -> MediaResult<()>;

    /// Write every frame as an image; `frame_pattern` contains `%d`
    async fn decode_frames(&self, input: &Path, frame_pattern: &Path) -> MediaResult<()>;

    /// Encode one frame image into a short clip at the descriptor's size and quality
    async fn encode_frame(&self, frame: &FrameDescriptor, frame_rate: &str, clip_out: &Path) -> MediaResult<()>;

    /// Join the clips listed in `manifest` without re-encoding, muxing `audio` in when present
    async fn concat(&self, manifest: &Path, audio: Option<&Path>, output: &Path) -> MediaResult<()>;
}
