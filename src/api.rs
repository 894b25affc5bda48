//! HTTP surface of the backend: the downloader page, the format listing and
//! the two download relays.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{
    extractor::YtDlp,
    formats::{self, FormatListing, MediaKind},
    proxy::Proxy,
    video_id,
};

const INDEX_HTML: &str = include_str!("../web/index.html");

#[derive(Clone)]
pub struct AppState {
    extractor: Arc<YtDlp>,
    proxy: Proxy,
}

impl AppState {
    pub fn new(extractor: YtDlp, proxy: Proxy) -> Self {
        Self {
            extractor: Arc::new(extractor),
            proxy,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct MediaQuery {
    url: Option<String>,
    quality: Option<String>,
}

impl MediaQuery {
    fn url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    fn quality(&self) -> Option<&str> {
        self.quality
            .as_deref()
            .map(str::trim)
            .filter(|quality| !quality.is_empty())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(index))
        .route("/formats", get(list_formats))
        .route("/download/video", get(download_video))
        .route("/download/audio", get(download_audio))
        .layer(cors)
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_formats(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Json<FormatListing>> {
    let id = require_video_id(query.url())?;
    let info = state
        .extractor
        .fetch_info(&video_id::canonical_watch_url(&id))
        .await
        .map_err(|err| {
            error!(video = %id, "Error fetching formats: {err:#}");
            ApiError::internal(format!("Failed to fetch video formats. {err:#}"))
        })?;

    let listing = FormatListing::from_info(&info);
    info!(
        video = %id,
        video_formats = listing.video_formats.len(),
        audio_formats = listing.audio_formats.len(),
        "listed formats"
    );
    Ok(Json(listing))
}

async fn download_video(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Response> {
    relay_download(state, query, MediaKind::Video).await
}

async fn download_audio(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Response> {
    if query.url().is_none() || query.quality().is_none() {
        return Err(ApiError::bad_request("URL and quality are required"));
    }
    relay_download(state, query, MediaKind::Audio).await
}

async fn relay_download(state: AppState, query: MediaQuery, kind: MediaKind) -> ApiResult<Response> {
    let id = require_video_id(query.url())?;
    let failed = |err: anyhow::Error| {
        error!(video = %id, kind = kind.as_str(), "Error downloading: {err:#}");
        ApiError::internal(format!("Failed to download {}. {err:#}", kind.as_str()))
    };

    let info = state
        .extractor
        .fetch_info(&video_id::canonical_watch_url(&id))
        .await
        .map_err(failed)?;
    let available = formats::descriptors(&info);
    let format = formats::select_format(&available, kind, query.quality())
        .ok_or_else(|| ApiError::bad_request("Requested quality is not available"))?;

    let upstream = state.proxy.open(format).await.map_err(failed)?;
    info!(
        video = %id,
        kind = kind.as_str(),
        itag = %format.itag,
        length = ?upstream.content_length,
        "relaying download"
    );

    let content_type = upstream
        .content_type
        .clone()
        .unwrap_or_else(|| format.mime_type.clone());
    let content_length = upstream.content_length;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(kind.content_disposition()),
    );
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    let body = Body::from_stream(upstream.into_stream());
    Ok((headers, body).into_response())
}

fn require_video_id(url: Option<&str>) -> ApiResult<String> {
    let url = url.ok_or_else(|| ApiError::bad_request("URL is required"))?;
    video_id::extract_video_id(url).ok_or_else(|| ApiError::bad_request("Invalid YouTube URL"))
}
