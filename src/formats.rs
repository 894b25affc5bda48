//! Normalized stream formats.
//!
//! yt-dlp's format objects are loosely typed and vary between extractors.
//! Everything downstream (the JSON API, quality selection, the proxy) works on
//! [`FormatDescriptor`] instead, which is built once at the boundary by
//! [`FormatDescriptor::from_raw`].

use std::collections::{BTreeMap, HashSet};

use mime_guess::MimeGuess;
use serde::Serialize;

use crate::extractor::{RawFormat, VideoInfo};

/// Duration assumed for size estimates when the extractor does not report one.
pub const FALLBACK_DURATION_SECS: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Download responses always offer the same fixed file name.
    pub fn content_disposition(self) -> &'static str {
        match self {
            MediaKind::Video => "attachment; filename=\"video.mp4\"",
            MediaKind::Audio => "attachment; filename=\"audio.mp3\"",
        }
    }
}

/// One downloadable stream variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub itag: String,
    pub quality_label: Option<String>,
    /// Bits per second.
    pub bitrate: Option<u64>,
    pub container: Option<String>,
    pub mime_type: String,
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Exact or approximate byte count when the extractor knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub approx_size: String,
    pub url: String,
    /// Headers yt-dlp says the media host expects. Never sent to browsers.
    #[serde(skip)]
    pub http_headers: BTreeMap<String, String>,
}

impl FormatDescriptor {
    /// Maps a raw yt-dlp format. Returns `None` for entries that cannot be
    /// downloaded (no id or URL), for manifest-based entries (HLS, DASH
    /// segments) whose URL is a playlist rather than the media itself, and for
    /// entries with neither an audio nor a video track, such as storyboards.
    pub fn from_raw(raw: &RawFormat, duration_secs: Option<f64>) -> Option<Self> {
        let itag = raw
            .format_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?
            .to_owned();
        let url = raw.url.clone().filter(|url| !url.is_empty())?;
        if !is_progressive(raw.protocol.as_deref(), &url) {
            return None;
        }

        let has_video = codec_present(raw.vcodec.as_deref());
        let has_audio = codec_present(raw.acodec.as_deref());
        if !has_video && !has_audio {
            return None;
        }

        let bitrate = kbps_to_bps(raw.tbr)
            .or_else(|| kbps_to_bps(raw.vbr))
            .or_else(|| kbps_to_bps(raw.abr));
        let quality_label = raw
            .format_note
            .clone()
            .filter(|note| !note.is_empty())
            .or_else(|| quality_label(raw.height, raw.dynamic_range.as_deref()));
        let container = raw.ext.clone().filter(|ext| !ext.is_empty());
        let mime_type = mime_for(container.as_deref(), has_video);
        let content_length = raw.filesize.or(raw.filesize_approx);
        let approx_size = match content_length {
            Some(bytes) if bytes > 0 => format_size(bytes as f64),
            _ => estimate_size(
                bitrate,
                duration_secs
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .unwrap_or(FALLBACK_DURATION_SECS),
            ),
        };

        Some(Self {
            itag,
            quality_label,
            bitrate,
            container,
            mime_type,
            has_video,
            has_audio,
            width: raw.width,
            height: raw.height,
            fps: raw.fps,
            content_length,
            approx_size,
            url,
            http_headers: raw.http_headers.clone(),
        })
    }

    pub fn is_muxed(&self) -> bool {
        self.has_video && self.has_audio
    }

    fn provides(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.has_video,
            MediaKind::Audio => self.has_audio,
        }
    }
}

/// Response body of `/formats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatListing {
    pub video_id: String,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub video_formats: Vec<FormatDescriptor>,
    pub audio_formats: Vec<FormatDescriptor>,
}

impl FormatListing {
    /// Maps every raw format, splits video from audio-only and collapses
    /// duplicates within each group.
    pub fn from_info(info: &VideoInfo) -> Self {
        let (video, audio) = partition_formats(descriptors(info));
        Self {
            video_id: info.id.clone(),
            title: info.display_title().map(str::to_owned),
            duration: info.duration,
            video_formats: dedupe_formats(video),
            audio_formats: dedupe_formats(audio),
        }
    }
}

/// All downloadable formats of `info`, in extractor order.
pub fn descriptors(info: &VideoInfo) -> Vec<FormatDescriptor> {
    info.formats
        .iter()
        .filter_map(|raw| FormatDescriptor::from_raw(raw, info.duration))
        .collect()
}

/// Splits formats into those carrying a video track and audio-only ones.
pub fn partition_formats(
    formats: Vec<FormatDescriptor>,
) -> (Vec<FormatDescriptor>, Vec<FormatDescriptor>) {
    let mut video = Vec::new();
    let mut audio = Vec::new();
    for format in formats {
        if format.has_video {
            video.push(format);
        } else if format.has_audio {
            audio.push(format);
        }
    }
    (video, audio)
}

/// Keeps the first format for every `(quality label, bitrate)` pair.
pub fn dedupe_formats(formats: Vec<FormatDescriptor>) -> Vec<FormatDescriptor> {
    let mut seen = HashSet::new();
    formats
        .into_iter()
        .filter(|format| seen.insert((format.quality_label.clone(), format.bitrate)))
        .collect()
}

/// Picks the format a download request refers to.
///
/// An explicit `quality` must name a format that carries the requested track.
/// Without one, video downloads get the best muxed stream so the file has
/// sound, falling back to the best video stream.
pub fn select_format<'a>(
    formats: &'a [FormatDescriptor],
    kind: MediaKind,
    quality: Option<&str>,
) -> Option<&'a FormatDescriptor> {
    match quality.map(str::trim).filter(|q| !q.is_empty()) {
        Some(quality) => formats
            .iter()
            .find(|format| format.itag == quality && format.provides(kind)),
        None => match kind {
            MediaKind::Video => formats
                .iter()
                .filter(|format| format.is_muxed())
                .max_by_key(|format| (format.height.unwrap_or(0), format.bitrate.unwrap_or(0)))
                .or_else(|| best_format(formats, MediaKind::Video)),
            MediaKind::Audio => best_format(formats, MediaKind::Audio),
        },
    }
}

/// Highest-bitrate format providing `kind`. Audio prefers audio-only streams.
pub fn best_format(formats: &[FormatDescriptor], kind: MediaKind) -> Option<&FormatDescriptor> {
    match kind {
        MediaKind::Video => highest_bitrate(formats.iter().filter(|f| f.has_video)),
        MediaKind::Audio => highest_bitrate(formats.iter().filter(|f| f.has_audio && !f.has_video))
            .or_else(|| highest_bitrate(formats.iter().filter(|f| f.has_audio))),
    }
}

/// First format with the highest bitrate; unknown bitrates rank lowest.
fn highest_bitrate<'a>(
    candidates: impl Iterator<Item = &'a FormatDescriptor>,
) -> Option<&'a FormatDescriptor> {
    candidates.fold(None, |best, format| match best {
        Some(current) if current.bitrate.unwrap_or(0) >= format.bitrate.unwrap_or(0) => {
            Some(current)
        }
        _ => Some(format),
    })
}

/// Estimated download size for `bitrate` bits/s over `duration_secs`.
pub fn estimate_size(bitrate: Option<u64>, duration_secs: f64) -> String {
    match bitrate {
        Some(bitrate) if bitrate > 0 => format_size(bitrate as f64 * duration_secs / 8.0),
        _ => "N/A".to_owned(),
    }
}

/// Renders a byte count in the largest of KB/MB/GB that is at least 1.
pub fn format_size(bytes: f64) -> String {
    let kb = bytes / 1024.0;
    let mb = kb / 1024.0;
    let gb = mb / 1024.0;
    if gb >= 1.0 {
        format!("{gb:.2} GB")
    } else if mb >= 1.0 {
        format!("{mb:.2} MB")
    } else {
        format!("{kb:.2} KB")
    }
}

/// Only plain HTTP(S) URLs can be relayed byte for byte. Without a
/// `protocol` the URL itself has to look like media, not a manifest.
fn is_progressive(protocol: Option<&str>, url: &str) -> bool {
    match protocol.map(str::trim).filter(|p| !p.is_empty()) {
        Some(protocol) => {
            protocol.eq_ignore_ascii_case("https") || protocol.eq_ignore_ascii_case("http")
        }
        None => {
            let url = url.to_ascii_lowercase();
            (url.starts_with("https://") || url.starts_with("http://"))
                && !url.contains(".m3u8")
                && !url.contains(".mpd")
        }
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
}

fn kbps_to_bps(kbps: Option<f64>) -> Option<u64> {
    kbps.filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| (value * 1000.0).round() as u64)
}

/// `1080p`, `2160p HDR10`; SDR is the default and left out.
fn quality_label(height: Option<i64>, dynamic_range: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(h) = height {
        parts.push(format!("{h}p"));
    }
    if let Some(range) = dynamic_range
        && !range.is_empty()
        && !range.eq_ignore_ascii_case("sdr")
    {
        parts.push(range.to_owned());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn mime_for(ext: Option<&str>, has_video: bool) -> String {
    let Some(ext) = ext else {
        return "application/octet-stream".to_owned();
    };
    if !has_video {
        let audio = match ext {
            "m4a" | "mp4" => Some("audio/mp4"),
            "webm" => Some("audio/webm"),
            "mp3" => Some("audio/mpeg"),
            "opus" | "ogg" => Some("audio/ogg"),
            _ => None,
        };
        if let Some(mime) = audio {
            return mime.to_owned();
        }
    }
    MimeGuess::from_ext(ext)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| format!("{}/{ext}", if has_video { "video" } else { "audio" }))
}
