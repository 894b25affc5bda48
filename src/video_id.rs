//! Recognizes YouTube video URLs and pulls out the 11-character video id.

use std::sync::LazyLock;

use regex::Regex;

static VIDEO_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?:https?://)?
        (?:www\.)?
        (?:
            youtube\.com/
            (?:
                [^/\n\s]+/\S+/      # /<segment>/<path>/<id>
              | (?:v|e(?:mbed)?)/   # /v/<id>, /e/<id>, /embed/<id>
              | \S*?[?&]v=          # /watch?v=<id>, ...&v=<id>
            )
          | youtu\.be/
        )
        ([a-zA-Z0-9_-]{11})
        ",
    )
    .expect("video id pattern is valid")
});

/// Returns the video id embedded in `input`, or `None` when the string is not
/// one of the recognized YouTube URL shapes.
pub fn extract_video_id(input: &str) -> Option<String> {
    VIDEO_ID_PATTERN
        .captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// The only URL form ever handed to the extractor.
pub fn canonical_watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}
