use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::effect::{effect_frame, EffectKind, FrameDescriptor, WaveParams};
use crate::error::{MediaError, MediaResult};
use crate::ffprobe::VideoInfo;
use crate::media::MediaTool;
use crate::temp::{RenderWorkspace, TempRoot};

/// Receives progress from a running pipeline
pub trait PipelineObserver: Send {
    /// Called after every encoded frame with completed / total
    fn frame_progress(&mut self, fraction: f64);

    /// Called once after the last frame, before the concat/mux step
    fn rendering_started(&mut self);
}

/// Probe, explode into frames, re-encode each frame at its waveform size, and reassemble.
pub struct FramePipeline<'a> {
    media: &'a dyn MediaTool,
    temp: &'a TempRoot,
    effect: EffectKind,
    bounces_per_second: f64,
}

impl<'a> FramePipeline<'a> {
    pub fn new(media: &'a dyn MediaTool, temp: &'a TempRoot, effect: EffectKind, bounces_per_second: f64) -> Self {
        FramePipeline {
            media,
            temp,
            effect,
            bounces_per_second,
        }
    }

    /// Transform `source` and return the absolute path of the finished `.webm`.
    ///
    /// The render workspace is removed before returning, whether or not the
    /// transform succeeded.
    pub async fn run(
        &self,
        source: &Path,
        output_name: &str,
        observer: &mut dyn PipelineObserver,
    ) -> MediaResult<PathBuf> {
        info!("🎬 Transforming {} ({})", source.display(), self.effect.keyword());

        let video = self.media.probe(source).await?;
        debug!(
            "{}: {}x{} @ {} ({:.3} fps)",
            output_name, video.width, video.height, video.frame_rate, video.fps
        );

        let workspace = self.temp.render_workspace(output_name).await?;
        let result = self.render(source, output_name, &video, &workspace, observer).await;
        workspace.remove().await;

        match &result {
            Ok(path) => info!("✅ Rendered {} -> {}", source.display(), path.display()),
            Err(e) => warn!("Transform of {} failed: {}", source.display(), e),
        }
        result
    }

    async fn render(
        &self,
        source: &Path,
        output_name: &str,
        video: &VideoInfo,
        workspace: &RenderWorkspace,
        observer: &mut dyn PipelineObserver,
    ) -> MediaResult<PathBuf> {
        // Plenty of inputs have no audio track
        let has_audio = match self.media.extract_audio(source, &workspace.audio_file).await {
            Ok(()) => true,
            Err(e) => {
                debug!("{}: continuing without audio ({})", output_name, e);
                false
            }
        };

        self.media.decode_frames(source, &workspace.frame_pattern()).await?;

        let frames = list_frames(&workspace.frames_dir).await?;
        if frames.is_empty() {
            return Err(MediaError::NoFrames(source.to_path_buf()));
        }

        let params = WaveParams::new(video.fps, self.bounces_per_second, video.width, video.height);
        let total = frames.len();
        let mut manifest = Vec::with_capacity(total);

        for (position, (_, frame_path)) in frames.into_iter().enumerate() {
            let index = position as u64;
            let geometry = effect_frame(index, &params, self.effect);
            let descriptor = FrameDescriptor::new(index, frame_path, geometry);

            let clip = workspace.resized_dir.join(clip_file_name(&descriptor.source_file));
            self.media.encode_frame(&descriptor, &video.frame_rate, &clip).await?;
            manifest.push(manifest_line(&clip));

            observer.frame_progress((position + 1) as f64 / total as f64);
        }
        observer.rendering_started();

        tokio::fs::write(&workspace.concat_list, manifest.join("\n")).await?;

        let (_, output) = self.temp.reserve_output(output_name)?;
        let audio = has_audio.then_some(workspace.audio_file.as_path());
        if let Err(e) = self.media.concat(&workspace.concat_list, audio, &output).await {
            remove_partial_output(&output).await;
            return Err(e);
        }

        Ok(output)
    }
}

/// Decoded frame images sorted by the number in their file name.
///
/// Plain name order would put "10.png" before "2.png".
pub async fn list_frames(frames_dir: &Path) -> MediaResult<Vec<(u64, PathBuf)>> {
    let dir = frames_dir.to_path_buf();
    let frames = tokio::task::spawn_blocking(move || -> MediaResult<Vec<(u64, PathBuf)>> {
        let mut frames = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| MediaError::Io(e.into()))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("png") {
                continue;
            }
            let index = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(index) = index {
                frames.push((index, path.to_path_buf()));
            }
        }
        frames.sort_by_key(|(index, _)| *index);
        Ok(frames)
    })
    .await
    .map_err(|e| MediaError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    Ok(frames)
}

/// Drop the reserved output after a failed concat. Failures are logged, never returned.
async fn remove_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", output.display(), e),
    }
}

fn clip_file_name(frame: &Path) -> String {
    let name = frame
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}.webm", name)
}

/// One concat-demuxer line; single quotes are closed, escaped, and reopened
fn manifest_line(clip: &Path) -> String {
    format!("file '{}'", clip.to_string_lossy().replace('\'', r"'\''"))
}
