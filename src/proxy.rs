//! Relays media bytes from the host yt-dlp resolved a format to.
//!
//! Nothing is buffered beyond a single chunk: the backend hands the upstream
//! stream straight to the HTTP response and the fetch CLI writes it to disk as
//! it arrives.

use std::path::Path;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_TYPE, COOKIE, HeaderName, HeaderValue};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::formats::FormatDescriptor;

pub const DEFAULT_USER_AGENT: &str = concat!("ytgrab/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Proxy {
    client: reqwest::Client,
}

/// An upstream response whose headers have arrived and whose body has not.
#[derive(Debug)]
pub struct Upstream {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    response: reqwest::Response,
}

impl Proxy {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Starts fetching `format.url`. The headers yt-dlp recorded for the
    /// format are replayed except `Cookie`; compression is disabled so the
    /// byte count matches the media file.
    pub async fn open(&self, format: &FormatDescriptor) -> Result<Upstream> {
        let mut request = self.client.get(&format.url);
        for (key, value) in &format.http_headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = %key, "skipping unrepresentable upstream header");
                continue;
            };
            if name == COOKIE {
                continue;
            }
            request = request.header(name, value);
        }
        request = request.header(ACCEPT_ENCODING, "identity");

        let response = request
            .send()
            .await
            .with_context(|| format!("requesting format {}", format.itag))?;

        let status = response.status();
        if !status.is_success() {
            bail!("media host answered {} for format {}", status, format.itag);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_length = response.content_length();

        Ok(Upstream {
            content_type,
            content_length,
            response,
        })
    }

    /// Streams `format` into `path`, calling `on_progress(downloaded, total)`
    /// after every chunk. Returns the number of bytes written.
    pub async fn download_to<F>(
        &self,
        format: &FormatDescriptor,
        path: &Path,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let upstream = self.open(format).await?;
        let total = upstream.content_length.or(format.content_length);
        let mut file = File::create(path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;

        let mut stream = upstream.into_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("reading format {}", format.itag))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush()
            .await
            .with_context(|| format!("flushing {}", path.display()))?;

        Ok(downloaded)
    }
}

impl Upstream {
    /// Body as a byte stream. A failure mid-way is logged here; the consumer
    /// sees the error and the transfer ends short.
    pub fn into_stream(self) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        self.response
            .bytes_stream()
            .inspect_err(|err| warn!("upstream stream failed: {err}"))
    }
}

/// Whole-percent progress, `None` when the total is unknown.
pub fn progress_percent(downloaded: u64, total: Option<u64>) -> Option<u64> {
    match total {
        Some(0) => Some(100),
        Some(total) => Some((downloaded.saturating_mul(100) / total).min(100)),
        None => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        Router,
        http::{HeaderMap, StatusCode, Uri, header},
        response::IntoResponse,
        routing::get,
    };

    /// Body served for `path`, so callers can tell which format was fetched.
    pub fn media_body(path: &str) -> String {
        format!("bytes of {path}")
    }

    async fn media(uri: Uri, headers: HeaderMap) -> impl IntoResponse {
        let agent = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let had_cookie = headers.contains_key(header::COOKIE);
        (
            [
                (header::CONTENT_TYPE, "audio/mp4".to_owned()),
                (header::HeaderName::from_static("x-seen-agent"), agent),
                (
                    header::HeaderName::from_static("x-seen-cookie"),
                    had_cookie.to_string(),
                ),
            ],
            media_body(uri.path()),
        )
    }

    async fn gone() -> StatusCode {
        StatusCode::FORBIDDEN
    }

    /// Binds `app` on an ephemeral local port; returns its base URL.
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Serves [`media_body`] on every path except `/gone`, which answers 403.
    pub async fn spawn_media_server() -> String {
        serve(Router::new().route("/gone", get(gone)).fallback(media)).await
    }

    /// Client that ignores proxy variables of the host running the tests.
    pub fn direct_client() -> reqwest::Client {
        reqwest::Client::builder()
            .user_agent(super::DEFAULT_USER_AGENT)
            .no_proxy()
            .build()
            .unwrap()
    }
}
