#![forbid(unsafe_code)]

//! Process-level guards shared by the ytgrab binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The backend spawns yt-dlp for
/// arbitrary visitors, so it must run under an unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::effective().is_root() {
        bail!("{process} must not be run as root; start it from an unprivileged account");
    }
    Ok(())
}
