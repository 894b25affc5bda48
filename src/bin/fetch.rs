#![forbid(unsafe_code)]

//! Command-line downloader. Resolves a YouTube URL, picks the best audio and
//! video streams (or the ones named on the command line) and writes each one
//! to disk next to each other.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing::info;
use ytgrab::{
    config,
    extractor::YtDlp,
    formats::{self, FormatDescriptor, MediaKind},
    logging,
    proxy::{self, DEFAULT_USER_AGENT, Proxy},
    video_id,
};

/// Bytes between progress lines when the total size is unknown.
const UNKNOWN_TOTAL_STEP: u64 = 8 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download the audio and video streams of a YouTube video.")]
struct Cli {
    #[arg(value_name = "URL", help = "YouTube watch, youtu.be, embed or /v/ URL")]
    url: String,
    #[arg(short = 'o', long = "output-dir", value_name = "DIR", default_value = ".", help = "Directory the files are written to")]
    output_dir: PathBuf,
    #[arg(long = "video", value_name = "ITAG", help = "Video format to download instead of the highest bitrate")]
    video: Option<String>,
    #[arg(long = "audio", value_name = "ITAG", help = "Audio format to download instead of the highest bitrate")]
    audio: Option<String>,
    #[arg(long = "skip-video", conflicts_with = "video", help = "Only download audio")]
    skip_video: bool,
    #[arg(long = "skip-audio", conflicts_with = "audio", help = "Only download video")]
    skip_audio: bool,
    #[arg(long = "config", value_name = "PATH", default_value = config::DEFAULT_CONFIG_PATH, help = "Path to the env-style config file")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings_from(&cli.config)?;
    logging::init(settings.log_format);

    if cli.skip_audio && cli.skip_video {
        bail!("nothing to download: both --skip-audio and --skip-video were given");
    }

    let id = video_id::extract_video_id(&cli.url)
        .ok_or_else(|| anyhow!("Invalid YouTube URL: {}", cli.url))?;
    let video_url = video_id::canonical_watch_url(&id);

    let extractor = YtDlp::new(settings.ytdlp_bin.clone())
        .with_cookies(settings.cookies_file.clone())
        .with_timeout(settings.extract_timeout);
    extractor.ensure_available().await?;

    info!("Fetching video info for {}", video_url);
    let info = extractor.fetch_info(&video_url).await?;
    if let Some(title) = info.display_title() {
        info!("Title: {}", title);
    }

    let available = formats::descriptors(&info);
    let plan = plan_downloads(&available, &cli)?;

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("creating {}", cli.output_dir.display()))?;

    let proxy = Proxy::new(DEFAULT_USER_AGENT)?;
    for (kind, format) in plan {
        let path = output_path(&cli.output_dir, &info.id, kind, format);
        info!(
            "Downloading {} format {} ({}, approx. {}) to {}",
            kind.as_str(),
            format.itag,
            format.quality_label.as_deref().unwrap_or("unlabeled"),
            format.approx_size,
            path.display()
        );

        let mut progress = Progress::new(kind);
        let written = proxy
            .download_to(format, &path, |done, total| {
                if let Some(line) = progress.update(done, total) {
                    info!("{}", line);
                }
            })
            .await
            .with_context(|| format!("downloading {} format {}", kind.as_str(), format.itag))?;

        info!(
            "{} download complete: {} ({})",
            capitalized(kind.as_str()),
            path.display(),
            formats::format_size(written as f64)
        );
    }

    Ok(())
}

/// Audio first, then video, each either the requested itag or the
/// highest-bitrate candidate.
fn plan_downloads<'a>(
    available: &'a [FormatDescriptor],
    cli: &Cli,
) -> Result<Vec<(MediaKind, &'a FormatDescriptor)>> {
    let mut plan = Vec::new();
    let wanted = [
        (MediaKind::Audio, cli.skip_audio, cli.audio.as_deref()),
        (MediaKind::Video, cli.skip_video, cli.video.as_deref()),
    ];
    for (kind, skip, requested) in wanted {
        if skip {
            continue;
        }
        let format = match requested {
            Some(itag) => formats::select_format(available, kind, Some(itag)).ok_or_else(|| {
                anyhow!("format {itag} is not available with a {} track", kind.as_str())
            })?,
            None => formats::best_format(available, kind)
                .ok_or_else(|| anyhow!("No {} formats available", kind.as_str()))?,
        };
        plan.push((kind, format));
    }
    Ok(plan)
}

fn output_path(dir: &Path, video_id: &str, kind: MediaKind, format: &FormatDescriptor) -> PathBuf {
    let ext = format.container.as_deref().unwrap_or("bin");
    dir.join(format!("{video_id}-{}.{ext}", kind.as_str()))
}

fn capitalized(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Turns per-chunk callbacks into a line every 10 %, or every
/// `UNKNOWN_TOTAL_STEP` bytes when the size is unknown.
struct Progress {
    kind: MediaKind,
    last_step: Option<u64>,
}

impl Progress {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            last_step: None,
        }
    }

    fn update(&mut self, downloaded: u64, total: Option<u64>) -> Option<String> {
        let (step, line) = match proxy::progress_percent(downloaded, total) {
            Some(percent) => {
                let step = percent / 10 * 10;
                (step, format!("Downloading {}: {}%", self.kind.as_str(), step))
            }
            None => {
                let step = downloaded / UNKNOWN_TOTAL_STEP;
                (
                    step,
                    format!(
                        "Downloading {}: {} so far",
                        self.kind.as_str(),
                        formats::format_size(downloaded as f64)
                    ),
                )
            }
        };
        if self.last_step.is_some_and(|last| step <= last) {
            return None;
        }
        self.last_step = Some(step);
        Some(line)
    }
}
