//! Thin async wrapper around the `yt-dlp` binary.
//!
//! yt-dlp does the heavy lifting of resolving a watch page into stream URLs.
//! We only ask it for `--dump-single-json` and deserialize the handful of
//! fields the rest of the crate needs; everything else in the payload is
//! ignored.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DEFAULT_EXTRACT_TIMEOUT_SECS;

/// Subset of yt-dlp's `--dump-single-json` payload. Everything but the id is
/// optional because yt-dlp omits fields it could not determine.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    /// Seconds; yt-dlp reports fractional values for some extractors.
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

impl VideoInfo {
    pub fn display_title(&self) -> Option<&str> {
        self.fulltitle
            .as_deref()
            .or(self.title.as_deref())
            .filter(|title| !title.is_empty())
    }
}

/// One entry of `formats`. Bitrates are in kbit/s, as yt-dlp reports them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
    pub vbr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub dynamic_range: Option<String>,
    /// `https`, `m3u8_native`, `http_dash_segments`, ...
    pub protocol: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `<program> --version` so a missing dependency is reported at
    /// startup instead of on the first request.
    pub async fn ensure_available(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| {
                format!(
                    "{} is not installed or not in PATH",
                    self.program.display()
                )
            })?;

        if !output.status.success() {
            bail!(
                "{} is installed but returned a failure status ({})",
                self.program.display(),
                output.status
            );
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        info!(program = %self.program.display(), %version, "extractor available");
        Ok(version)
    }

    /// Resolves `video_url` into its metadata and stream list.
    ///
    /// The URL is passed after `--` so it can never be parsed as an option.
    /// The child is killed if the timeout fires or the caller's future is
    /// dropped.
    pub async fn fetch_info(&self, video_url: &str) -> Result<VideoInfo> {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist");

        if let Some(cookies) = self.cookies.as_deref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }

        command
            .arg("--")
            .arg(video_url)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(url = video_url, "running extractor");
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| {
                format!(
                    "extracting {} timed out after {}s",
                    video_url,
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("running {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            if detail.is_empty() {
                bail!("extractor failed for {} ({})", video_url, output.status);
            }
            bail!("extractor failed for {}: {}", video_url, detail);
        }

        let info: VideoInfo =
            serde_json::from_slice(&output.stdout).context("deserializing extractor JSON")?;
        debug!(
            id = %info.id,
            formats = info.formats.len(),
            "extractor returned metadata"
        );
        Ok(info)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use anyhow::Result;

    /// Writes an executable bash script named `yt-dlp` into `dir` that answers
    /// `--version` and prints `json` for `--dump-single-json`. The arguments it
    /// was called with are appended to `<dir>/args.log`.
    pub fn install_ytdlp_stub(dir: &Path, json: &str) -> Result<PathBuf> {
        let script = format!(
            r#"#!/usr/bin/env bash
set -euo pipefail
echo "$@" >> "{log}"
if [[ " $* " == *" --version "* ]]; then
    echo "2025.01.01"
    exit 0
fi
if [[ " $* " == *" --dump-single-json "* ]]; then
cat <<'JSON'
{json}
JSON
exit 0
fi
exit 0
"#,
            log = dir.join("args.log").display(),
        );
        write_script(dir, &script)
    }

    /// Stub that always fails with `message` on stderr.
    pub fn install_failing_stub(dir: &Path, message: &str) -> Result<PathBuf> {
        let script = format!(
            "#!/usr/bin/env bash\necho \"{message}\" >&2\nexit 1\n"
        );
        write_script(dir, &script)
    }

    fn write_script(dir: &Path, script: &str) -> Result<PathBuf> {
        let script_path = dir.join("yt-dlp");
        fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)?;
        }
        Ok(script_path)
    }

    /// yt-dlp style payload whose stream URLs point at `media_base`.
    ///
    /// Besides progressive streams it carries a storyboard, an HLS muxed
    /// variant (`96`) and a DASH-segment entry (`299`), none of which can be
    /// relayed. Format `250` points at `/gone`, which media test servers
    /// answer with 403.
    pub fn sample_info_json(media_base: &str) -> String {
        serde_json::json!({
            "id": "dQw4w9WgXcQ",
            "title": "Sample Title",
            "fulltitle": "Sample Title",
            "duration": 212.0,
            "formats": [
                {
                    "format_id": "sb0",
                    "format_note": "storyboard",
                    "ext": "mhtml",
                    "vcodec": "none",
                    "acodec": "none",
                    "protocol": "mhtml",
                    "url": format!("{media_base}/sb0")
                },
                {
                    "format_id": "139",
                    "format_note": "low",
                    "ext": "m4a",
                    "vcodec": "none",
                    "acodec": "mp4a.40.5",
                    "abr": 48.8,
                    "tbr": 48.8,
                    "protocol": "https",
                    "url": format!("{media_base}/139"),
                    "http_headers": { "User-Agent": "stub-agent", "Cookie": "secret=1" }
                },
                {
                    "format_id": "140",
                    "format_note": "medium",
                    "ext": "m4a",
                    "vcodec": "none",
                    "acodec": "mp4a.40.2",
                    "tbr": 129.5,
                    "filesize": 3_435_000,
                    "protocol": "https",
                    "url": format!("{media_base}/140")
                },
                {
                    "format_id": "140-drc",
                    "format_note": "medium",
                    "ext": "m4a",
                    "vcodec": "none",
                    "acodec": "mp4a.40.2",
                    "tbr": 129.5,
                    "protocol": "https",
                    "url": format!("{media_base}/140-drc")
                },
                {
                    "format_id": "250",
                    "format_note": "low",
                    "ext": "webm",
                    "vcodec": "none",
                    "acodec": "opus",
                    "tbr": 70.0,
                    "protocol": "https",
                    "url": format!("{media_base}/gone")
                },
                {
                    "format_id": "18",
                    "format_note": "360p",
                    "ext": "mp4",
                    "vcodec": "avc1.42001E",
                    "acodec": "mp4a.40.2",
                    "width": 640,
                    "height": 360,
                    "fps": 25.0,
                    "tbr": 503.2,
                    "protocol": "https",
                    "url": format!("{media_base}/18")
                },
                {
                    "format_id": "96",
                    "format_note": "1080p",
                    "ext": "mp4",
                    "vcodec": "avc1.640028",
                    "acodec": "mp4a.40.2",
                    "width": 1920,
                    "height": 1080,
                    "fps": 25.0,
                    "tbr": 5000.0,
                    "protocol": "m3u8_native",
                    "url": format!("{media_base}/api/manifest/hls_playlist/itag/96/index.m3u8")
                },
                {
                    "format_id": "137",
                    "format_note": "1080p",
                    "ext": "mp4",
                    "vcodec": "avc1.640028",
                    "acodec": "none",
                    "width": 1920,
                    "height": 1080,
                    "fps": 25.0,
                    "tbr": 4400.0,
                    "protocol": "https",
                    "url": format!("{media_base}/137")
                },
                {
                    "format_id": "248",
                    "ext": "webm",
                    "vcodec": "vp9",
                    "acodec": "none",
                    "width": 1920,
                    "height": 1080,
                    "tbr": 2600.0,
                    "dynamic_range": "SDR",
                    "protocol": "https",
                    "url": format!("{media_base}/248")
                },
                {
                    "format_id": "299",
                    "format_note": "1080p60",
                    "ext": "mp4",
                    "vcodec": "avc1.64002a",
                    "acodec": "none",
                    "width": 1920,
                    "height": 1080,
                    "fps": 60.0,
                    "tbr": 6000.0,
                    "protocol": "http_dash_segments",
                    "url": format!("{media_base}/dash/299")
                }
            ]
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fetch_info_parses_stub_output() -> Result<()> {
        let dir = tempdir()?;
        let stub = install_ytdlp_stub(dir.path(), &sample_info_json("http://media.invalid"))?;
        let ytdlp = YtDlp::new(stub);

        let info = ytdlp
            .fetch_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await?;
        assert_eq!(info.id, "dQw4w9WgXcQ");
        assert_eq!(info.display_title(), Some("Sample Title"));
        assert_eq!(info.duration, Some(212.0));
        assert_eq!(info.formats.len(), 10);
        assert_eq!(info.formats[6].protocol.as_deref(), Some("m3u8_native"));
        assert_eq!(
            info.formats[1].http_headers.get("User-Agent").map(String::as_str),
            Some("stub-agent")
        );
        Ok(())
    }

    #[tokio::test]
    async fn fetch_info_passes_url_after_separator() -> Result<()> {
        let dir = tempdir()?;
        let stub = install_ytdlp_stub(dir.path(), &sample_info_json("http://media.invalid"))?;
        let cookies = dir.path().join("cookies.txt");
        fs::write(&cookies, "# Netscape HTTP Cookie File\n")?;
        let ytdlp = YtDlp::new(stub).with_cookies(Some(cookies.clone()));

        ytdlp
            .fetch_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await?;

        let log = fs::read_to_string(dir.path().join("args.log"))?;
        assert!(log.contains("--no-playlist"));
        assert!(log.contains(&format!("--cookies {}", cookies.display())));
        assert!(log.trim_end().ends_with("-- https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_cookie_file_is_not_forwarded() -> Result<()> {
        let dir = tempdir()?;
        let stub = install_ytdlp_stub(dir.path(), &sample_info_json("http://media.invalid"))?;
        let ytdlp = YtDlp::new(stub).with_cookies(Some(dir.path().join("absent.txt")));

        ytdlp
            .fetch_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await?;

        let log = fs::read_to_string(dir.path().join("args.log"))?;
        assert!(!log.contains("--cookies"));
        Ok(())
    }

    #[tokio::test]
    async fn failure_surfaces_stderr() -> Result<()> {
        let dir = tempdir()?;
        let stub = install_failing_stub(dir.path(), "ERROR: Video unavailable")?;
        let err = YtDlp::new(stub)
            .fetch_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Video unavailable"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let dir = tempdir().unwrap();
        let ytdlp = YtDlp::new(dir.path().join("does-not-exist"));
        assert!(ytdlp.ensure_available().await.is_err());
        assert!(
            ytdlp
                .fetch_info("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ensure_available_reports_version() -> Result<()> {
        let dir = tempdir()?;
        let stub = install_ytdlp_stub(dir.path(), "{}")?;
        let version = YtDlp::new(stub).ensure_available().await?;
        assert_eq!(version, "2025.01.01");
        Ok(())
    }
}
