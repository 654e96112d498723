//! loopfetch - audio-content package resolution & deployment
//!
//! Resolves vendor-published catalogs of downloadable audio-content
//! packages into a canonical, deduplicated, patched package set, then
//! materializes each package from one of several interchangeable sources
//! with resumable, integrity-aware transfer.
//!
//! # Architecture
//!
//! - **Resolution phase** (pure): [`core::manifest`] parses catalog bytes
//!   into attribute records, [`core::patch`] overlays corrective metadata
//!   and filters by selection, [`core::registry`] converts the survivors
//!   into canonical [`core::package::Package`] entities with a global
//!   single-instance-per-identity guarantee.
//! - **Deployment phase** (effectful): [`ops::resolve`] picks the fetch
//!   source (origin / caching proxy / static mirror / disk image),
//!   [`ops::deploy`] drives resumable transfers and cleanup.
//! - **Leaves**: [`io::transport`] (HTTP probe/fetch) and [`io::image`]
//!   (sparse/DMG lifecycle) are thin capability wrappers the pipeline
//!   never reaches around.

pub mod core;
pub mod io;
pub mod ops;

// Re-exports for convenience
pub use core::catalog;
pub use core::manifest;
pub use core::package;
pub use core::registry::Registry;

use dirs::home_dir;
use std::path::PathBuf;

/// Returns the working directory, or None if the user's home cannot be resolved.
pub fn try_loopfetch_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("LOOPFETCH_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".loopfetch"))
}

/// Returns the canonical working directory (`~/.loopfetch`).
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn loopfetch_home() -> PathBuf {
    try_loopfetch_home().expect("Could not determine home directory")
}

/// Logs directory: ~/.loopfetch/logs
pub fn log_dir() -> PathBuf {
    loopfetch_home().join("logs")
}

/// Generate a run log path
pub fn run_log_path() -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    log_dir().join(format!("run-{timestamp}.log"))
}

/// Default download destination when none is given
pub fn default_destination() -> PathBuf {
    std::env::temp_dir().join("loopfetch")
}

/// Extract the filename from a URL or path.
///
/// # Example
///
/// ```
/// use loopfetch::filename_from_url;
///
/// assert_eq!(filename_from_url("https://example.com/lp10/file.pkg"), "file.pkg");
/// assert_eq!(filename_from_url(""), "");
/// ```
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// Vendor origin for audio-content catalogs and payloads
pub const ORIGIN_URL: &str = "https://audiocontentdownload.apple.com/lp10_ms3_content_2016";

/// Host part of [`ORIGIN_URL`], used when rewriting URLs for a caching proxy
pub const ORIGIN_HOST: &str = "audiocontentdownload.apple.com";

/// Well-known mirror sub-paths probed to confirm a mirror actually carries
/// the vendor layout. 2xx or 403 on any of these accepts the mirror.
pub const MIRROR_TEST_PATHS: [&str; 2] = ["lp10_ms3_content_2016", "lp10_ms3_content_2013"];

/// Filesystems a built disk image may use
pub const VALID_IMAGE_FS: [&str; 2] = ["JHFS+", "APFS"];

/// Default mountpoint for the lifecycle-managed disk image
pub const IMAGE_MOUNT: &str = "/Volumes/loopfetch";

/// Default volume name for a built disk image
pub const IMAGE_VOLUME_NAME: &str = "loopfetch";

/// User Agent string
pub const USER_AGENT: &str = concat!("loopfetch/", env!("CARGO_PKG_VERSION"));
