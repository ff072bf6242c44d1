use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use crate::config::BouncerConfig;
use crate::effect::FrameDescriptor;
use crate::error::{MediaError, MediaResult};
use crate::ffprobe::VideoInfo;
use crate::media::MediaTool;

/// Output of a finished external process
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// ffmpeg/ffprobe version reported by `-version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    /// Parse the first line of `ffmpeg -version`.
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> ToolVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_line: &str) -> Option<Self> {
        let token = version_line
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))?;

        // Distro builds append "-3ubuntu5" and similar
        let numeric: String = token
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(ToolVersion { major, minor, patch })
    }
}

/// Builds the argument lists for each media-tool stage
#[derive(Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// ffprobe: first video stream's size and frame rate as JSON
    pub fn probe(&self, input: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v".to_string(),
            "-of".to_string(),
            "json".to_string(),
            "-show_entries".to_string(),
            "stream=r_frame_rate,width,height".to_string(),
            path_arg(input),
        ]
    }

    /// Drop video, re-encode audio as Vorbis
    pub fn extract_audio(&self, input: &Path, audio_out: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            path_arg(input),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libvorbis".to_string(),
            path_arg(audio_out),
        ]
    }

    /// One PNG per frame, numbered from 1
    pub fn decode_frames(&self, input: &Path, frame_pattern: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            path_arg(input),
            path_arg(frame_pattern),
        ]
    }

    /// Single-frame VP8 clip at the target size, aspect forced to match
    pub fn encode_frame(&self, frame: &FrameDescriptor, frame_rate: &str, clip_out: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            path_arg(&frame.source_file),
            "-c:v".to_string(),
            "vp8".to_string(),
            "-b:v".to_string(),
            format!("{}k", frame.quality),
            "-crf".to_string(),
            "10".to_string(),
            "-vf".to_string(),
            format!("scale={}x{}", frame.width, frame.height),
            "-aspect".to_string(),
            format!("{}:{}", frame.width, frame.height),
            "-r".to_string(),
            frame_rate.to_string(),
            "-f".to_string(),
            "webm".to_string(),
            path_arg(clip_out),
        ]
    }

    /// Stream-copy concat of the manifest, with the extracted audio as a second input
    pub fn concat(&self, manifest: &Path, audio: Option<&Path>, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            path_arg(manifest),
        ];
        if let Some(audio) = audio {
            args.push("-i".to_string());
            args.push(path_arg(audio));
        }
        args.push("-c".to_string());
        args.push("copy".to_string());
        args.push(path_arg(output));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// `MediaTool` backed by real ffmpeg/ffprobe processes
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub timeout: Option<Duration>,
}

impl FfmpegTool {
    pub fn new(config: &BouncerConfig) -> Self {
        FfmpegTool {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            timeout: config.process_timeout(),
        }
    }

    /// Run `ffmpeg -version` and parse the reported version
    pub async fn detect_version(&self) -> MediaResult<ToolVersion> {
        let output = self
            .execute("version check", &self.ffmpeg_bin, vec!["-version".to_string()])
            .await?;
        let first_line = output.stdout.lines().next().unwrap_or_default();
        ToolVersion::parse(first_line)
            .ok_or_else(|| MediaError::Probe(format!("unrecognised version line: {}", first_line)))
    }

    /// Spawn `bin` with `args`, capture both streams, and fail on non-zero exit.
    async fn execute(&self, stage: &'static str, bin: &Path, args: Vec<String>) -> MediaResult<ToolOutput> {
        debug!("{}: {} {}", stage, bin.display(), args.join(" "));

        let mut cmd = Command::new(bin);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| MediaError::Spawn {
            bin: bin.to_path_buf(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes concurrently so a chatty tool never blocks on a full buffer
        let stdout_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stdout) = stdout {
                let mut line_stream = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    lines.push(line);
                }
            }
            lines.join("\n")
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                let mut line_stream = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = line_stream.next_line().await {
                    lines.push(line);
                }
            }
            lines.join("\n")
        });

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result?,
                Err(_) => {
                    child.kill().await?;
                    return Err(MediaError::Timeout {
                        stage,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            debug!("{} exited with {}", stage, exit_code);
            return Err(MediaError::Tool {
                stage,
                exit_code,
                output: combined_output(&stderr, &stdout),
            });
        }

        Ok(ToolOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn combined_output(stderr: &str, stdout: &str) -> String {
    match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
        (false, false) => format!("{}\n{}", stderr, stdout),
        (false, true) => stderr.to_string(),
        (true, false) => stdout.to_string(),
        (true, true) => String::new(),
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        if !input.exists() {
            return Err(MediaError::Probe(format!("file does not exist: {}", input.display())));
        }
        let args = CommandBuilder::new().probe(input);
        let output = self.execute("ffprobe", &self.ffprobe_bin, args).await?;
        VideoInfo::from_probe_json(&output.stdout)
    }

    async fn extract_audio(&self, input: &Path, audio_out: &Path) -> MediaResult<()> {
        let args = CommandBuilder::new().extract_audio(input, audio_out);
        self.execute("audio extraction", &self.ffmpeg_bin, args).await?;
        Ok(())
    }

    async fn decode_frames(&self, input: &Path, frame_pattern: &Path) -> MediaResult<()> {
        let args = CommandBuilder::new().decode_frames(input, frame_pattern);
        self.execute("frame decode", &self.ffmpeg_bin, args).await?;
        Ok(())
    }

    async fn encode_frame(&self, frame: &FrameDescriptor, frame_rate: &str, clip_out: &Path) -> MediaResult<()> {
        let args = CommandBuilder::new().encode_frame(frame, frame_rate, clip_out);
        self.execute("frame encode", &self.ffmpeg_bin, args).await?;
        Ok(())
    }

    async fn concat(&self, manifest: &Path, audio: Option<&Path>, output: &Path) -> MediaResult<()> {
        let args = CommandBuilder::new().concat(manifest, audio, output);
        self.execute("concat", &self.ffmpeg_bin, args).await?;
        Ok(())
    }
}
