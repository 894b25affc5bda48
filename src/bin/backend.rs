#![forbid(unsafe_code)]

//! HTTP backend: serves the downloader page, lists the formats of a video and
//! relays the selected stream to the browser.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use ytgrab::{
    api::{self, AppState},
    config::{self, Settings},
    extractor::YtDlp,
    logging,
    proxy::{DEFAULT_USER_AGENT, Proxy},
    security,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the ytgrab downloader page and API.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = config::DEFAULT_CONFIG_PATH, help = "Path to the env-style config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Listen address (overrides YTGRAB_HOST)")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Listen port (overrides YTGRAB_PORT)")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = config::load_settings_from(&cli.config)?;
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    logging::init(settings.log_format);
    security::ensure_not_root("backend")?;

    let extractor = build_extractor(&settings);
    if let Err(err) = extractor.ensure_available().await {
        warn!("{err:#}; format listing will fail until it is installed");
    }
    let state = AppState::new(extractor, Proxy::new(DEFAULT_USER_AGENT)?);

    let addr = SocketAddr::new(
        settings
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("parsing listen address {}", settings.host))?,
        settings.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn build_extractor(settings: &Settings) -> YtDlp {
    YtDlp::new(settings.ytdlp_bin.clone())
        .with_cookies(settings.cookies_file.clone())
        .with_timeout(settings.extract_timeout)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
    info!("shutting down");
}
