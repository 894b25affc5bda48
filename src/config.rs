use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ytgrab-env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format {other:?} (expected \"pretty\" or \"json\")"),
        }
    }
}

/// Raw values found in the env-file or the process environment. Everything is
/// optional; gaps are filled with defaults by [`Settings::from_env_config`].
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_bin: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub extract_timeout_secs: Option<u64>,
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub ytdlp_bin: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub extract_timeout: Duration,
    pub log_format: LogFormat,
}

impl EnvConfig {
    /// Applies one `KEY=VALUE` pair. Unknown keys are ignored so the file can
    /// be shared with other services, and empty values count as unset.
    /// `source` only feeds error messages.
    fn apply(&mut self, key: &str, value: &str, source: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        match key {
            "YTGRAB_HOST" => self.host = Some(value.to_string()),
            "YTGRAB_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing YTGRAB_PORT from {source}"))?;
                self.port = Some(port);
            }
            "YTDLP_BIN" => self.ytdlp_bin = Some(PathBuf::from(value)),
            "COOKIES_FILE" => self.cookies_file = Some(PathBuf::from(value)),
            "EXTRACT_TIMEOUT_SECS" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Parsing EXTRACT_TIMEOUT_SECS from {source}"))?;
                if secs == 0 {
                    bail!("EXTRACT_TIMEOUT_SECS must be positive in {source}");
                }
                self.extract_timeout_secs = Some(secs);
            }
            "LOG_FORMAT" => {
                let format = LogFormat::parse(value)
                    .with_context(|| format!("Parsing LOG_FORMAT from {source}"))?;
                self.log_format = Some(format);
            }
            _ => {}
        }
        Ok(())
    }

    /// Layers process environment values on top of the file values. `lookup`
    /// is `std::env::var` in production and a map in tests.
    pub fn apply_environment<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in [
            "YTGRAB_HOST",
            "YTGRAB_PORT",
            "YTDLP_BIN",
            "COOKIES_FILE",
            "EXTRACT_TIMEOUT_SECS",
            "LOG_FORMAT",
        ] {
            if let Some(value) = lookup(key) {
                self.apply(key, value.trim(), "the environment")?;
            }
        }
        Ok(())
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let source = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.apply(key.trim(), value, &source)?;
        }
    }
    Ok(Some(cfg))
}

impl Settings {
    pub fn from_env_config(cfg: EnvConfig) -> Self {
        Self {
            host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            ytdlp_bin: cfg
                .ytdlp_bin
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN)),
            cookies_file: cfg.cookies_file,
            extract_timeout: Duration::from_secs(
                cfg.extract_timeout_secs
                    .unwrap_or(DEFAULT_EXTRACT_TIMEOUT_SECS),
            ),
            log_format: cfg.log_format.unwrap_or_default(),
        }
    }
}

/// Loads settings from the env-file at `path` (missing file means defaults)
/// and then the process environment.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    cfg.apply_environment(lookup)?;
    Ok(Settings::from_env_config(cfg))
}
