mod console;
mod inputs;

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use bouncer::chat::{should_handle, ChannelInfo, ChannelKind, ChannelRef, InboundRequest};
use bouncer::{BouncerConfig, FfmpegTool, HttpFetcher, JobContext, Orchestrator, TempRoot};
use clap::Parser;
use log::{info, warn};
use crate::console::ConsoleChat;

/// Apply a bounce effect to videos
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Command text, as it would be typed in chat (e.g. "!render shutter")
    #[arg(short, long, default_value = "!render")]
    message: String,

    /// Directory delivered outputs are copied into
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Print the session report as JSON when done
    #[arg(long)]
    json: bool,

    /// Video files, directories, or http(s) URLs
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = BouncerConfig::load_config(args.config.as_deref()).context("Failed to load configuration")?;

    info!("Bouncer starting");
    info!("  Temp root: {}", cfg.temp_root.display());
    info!("  Command prefix: {}", cfg.command_prefix);
    info!("  Bounces per second: {}", cfg.bounces_per_second);
    info!("  Status interval: {}s", cfg.status_interval_secs);

    let media = FfmpegTool::new(&cfg);
    let version = media
        .detect_version()
        .await
        .with_context(|| format!("{} is not usable", cfg.ffmpeg_bin.display()))?;
    info!("Using ffmpeg {}.{}.{}", version.major, version.minor, version.patch);

    let temp = TempRoot::init(&cfg.temp_root)
        .with_context(|| format!("Failed to create temp root: {}", cfg.temp_root.display()))?;
    let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;

    let attachments = inputs::collect_attachments(&args.inputs)?;
    let request = InboundRequest {
        author_is_bot: false,
        text: args.message.clone(),
        attachments,
        channel: ChannelInfo {
            channel: ChannelRef("console".to_string()),
            kind: ChannelKind::Dm,
            bot_permissions: None,
        },
    };

    if !should_handle(&request, &cfg.command_prefix) {
        warn!(
            "\"{}\" is not a render command (expected {}render ...)",
            args.message, cfg.command_prefix
        );
        return Ok(());
    }

    let ctx = Arc::new(JobContext {
        temp,
        fetcher: Arc::new(fetcher),
        media: Arc::new(media),
        bounces_per_second: cfg.bounces_per_second,
    });
    let chat = Arc::new(ConsoleChat::new(args.out_dir.clone(), cfg.upload_limit_bytes));
    let orchestrator = Orchestrator::new(chat, ctx, cfg.status_interval());

    let report = orchestrator.run(request).await.context("Request rejected")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if report.failed > 0 {
        warn!("⚠️  {} of {} input(s) failed", report.failed, report.total);
    }

    Ok(())
}
