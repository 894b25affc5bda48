#![forbid(unsafe_code)]

//! Public entry point for the ytgrab crate.
//!
//! The binaries share everything through here, from URL validation and the
//! yt-dlp wrapper down to the streaming proxy and the HTTP routes built on it.

pub mod api;
pub mod config;
pub mod extractor;
pub mod formats;
pub mod logging;
pub mod proxy;
pub mod security;
pub mod video_id;
