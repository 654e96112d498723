//! Source resolution
//!
//! Decides where package payloads come from: an explicit disk image, a
//! caching proxy, a static mirror, or the default vendor origin.
//! Resolution happens once per run; per-package revalidation may fall a
//! single package back to the origin when the chosen source does not
//! carry its path. All reachability probes are header-only.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::package::Package;
use crate::io::transport::{Transport, TransferError};
use crate::{IMAGE_MOUNT, MIRROR_TEST_PATHS, ORIGIN_HOST, ORIGIN_URL};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cache server requires a port number in http://example.org:45678 format")]
    ProxyPortMissing,

    #[error("cache server does not support https")]
    ProxySchemeUnsupported,

    #[error("package server requires an HTTP/HTTPS scheme")]
    MirrorSchemeInvalid,

    #[error("mirrored folder structure cannot be found under {0}")]
    MirrorLayoutMissing(String),

    #[error("HTTP {status} for package server {url}")]
    MirrorStatus { url: String, status: u16 },

    #[error("package server path does not exist: {0}")]
    ImageMissing(String),

    #[error("malformed URL '{0}': {1}")]
    MalformedUrl(String, url::ParseError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl ResolveError {
    /// Distinct exit status per configuration/reachability class
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::MirrorStatus { .. } => 53,
            ResolveError::ImageMissing(_) => 54,
            ResolveError::MirrorLayoutMissing(_) => 55,
            ResolveError::MirrorSchemeInvalid | ResolveError::MalformedUrl(..) => 56,
            ResolveError::ProxySchemeUnsupported => 57,
            ResolveError::ProxyPortMissing => 58,
            ResolveError::Transfer(_) => 53,
        }
    }
}

/// Operator source overrides, at most one of which takes effect
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    /// Static mirror URL, or a disk image (`.dmg`) path/URL
    pub pkg_server: Option<String>,
    /// Caching proxy, `http://host:port`
    pub cache_server: Option<String>,
}

/// Where a package payload physically is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Url(String),
    Path(PathBuf),
}

/// Resolved base location plus topology, cached for the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Default vendor origin
    Origin { base: String },
    /// Caching proxy addressed by host:port; payload URLs are rewritten
    /// to `http://host:port/<path>?source=<origin-host>`
    CacheProxy { base: String, origin: String },
    /// Static mirror carrying the vendor's content-directory layout
    Mirror { base: String },
    /// Local or HTTP-hosted disk image, consumed via its mountpoint
    Image { path: String, mount: PathBuf },
}

impl SourceDescriptor {
    /// The default vendor origin
    pub fn origin() -> Self {
        SourceDescriptor::Origin {
            base: ORIGIN_URL.to_string(),
        }
    }

    /// Origin with an explicit base (fallback target; injectable in tests)
    pub fn origin_at(base: &str) -> Self {
        SourceDescriptor::Origin {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Effective fetch location for one package: the descriptor's base
    /// combined with the package's declared relative path. A leading
    /// `../` climbs into a sibling content directory.
    pub fn package_location(&self, package: &Package) -> Location {
        match self {
            SourceDescriptor::Origin { base } | SourceDescriptor::Mirror { base } => {
                Location::Url(join_url(base, &package.download_name))
            }
            SourceDescriptor::CacheProxy { base, origin } => {
                let canonical = join_url(origin, &package.download_name);
                let path = Url::parse(&canonical)
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|_| format!("/{}", package.download_name));
                Location::Url(format!("{base}{path}?source={ORIGIN_HOST}"))
            }
            SourceDescriptor::Image { mount, .. } => {
                Location::Path(join_path(mount, &package.download_name))
            }
        }
    }

    /// Re-check this source for one package; when the source does not
    /// answer for the package's path, fall that package back to the
    /// origin at `origin_base`.
    pub async fn revalidate(
        &self,
        package: &Package,
        transport: &Transport,
        origin_base: &str,
    ) -> SourceDescriptor {
        match self.package_location(package) {
            Location::Path(p) => {
                if p.exists() {
                    self.clone()
                } else {
                    warn!(
                        "{} not present in image source, falling back to origin",
                        package.display_name()
                    );
                    SourceDescriptor::origin_at(origin_base)
                }
            }
            Location::Url(url) => match transport.probe(&url).await {
                Ok(probe) if probe.ok() => self.clone(),
                _ => {
                    warn!(
                        "{} not reachable at resolved source, falling back to origin",
                        package.display_name()
                    );
                    SourceDescriptor::origin_at(origin_base)
                }
            },
        }
    }
}

/// Resolve the run's package source. Precedence: explicit disk image,
/// then caching proxy, then static mirror, then vendor origin.
pub async fn resolve(
    config: &SourceConfig,
    transport: &Transport,
) -> Result<SourceDescriptor, ResolveError> {
    if let Some(server) = &config.pkg_server {
        let server = server.trim_end_matches('/');
        if server.ends_with(".dmg") {
            return resolve_image(server, transport).await;
        }
    }

    if let Some(proxy) = &config.cache_server {
        return resolve_proxy(proxy);
    }

    if let Some(server) = &config.pkg_server {
        return resolve_mirror(server.trim_end_matches('/'), transport).await;
    }

    debug!("no source override, using vendor origin");
    Ok(SourceDescriptor::origin())
}

async fn resolve_image(
    server: &str,
    transport: &Transport,
) -> Result<SourceDescriptor, ResolveError> {
    let is_remote = Url::parse(server)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false);

    if is_remote {
        let probe = transport.probe(server).await?;
        if !probe.reachable() {
            return Err(ResolveError::ImageMissing(server.to_string()));
        }
    } else if !Path::new(server).exists() {
        return Err(ResolveError::ImageMissing(server.to_string()));
    }

    info!(image = server, "resolved disk image source");
    Ok(SourceDescriptor::Image {
        path: server.to_string(),
        mount: PathBuf::from(IMAGE_MOUNT),
    })
}

fn resolve_proxy(proxy: &str) -> Result<SourceDescriptor, ResolveError> {
    let url =
        Url::parse(proxy).map_err(|e| ResolveError::MalformedUrl(proxy.to_string(), e))?;

    // The caching-proxy protocol is plain http on an explicit port
    if url.scheme() != "http" {
        return Err(ResolveError::ProxySchemeUnsupported);
    }
    if url.port().is_none() {
        return Err(ResolveError::ProxyPortMissing);
    }

    info!(proxy, "resolved caching proxy source");
    Ok(SourceDescriptor::CacheProxy {
        base: proxy.trim_end_matches('/').to_string(),
        origin: ORIGIN_URL.to_string(),
    })
}

async fn resolve_mirror(
    server: &str,
    transport: &Transport,
) -> Result<SourceDescriptor, ResolveError> {
    let url =
        Url::parse(server).map_err(|e| ResolveError::MalformedUrl(server.to_string(), e))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ResolveError::MirrorSchemeInvalid);
    }

    let probe = transport.probe(server).await?;
    if !probe.reachable() {
        return Err(ResolveError::MirrorStatus {
            url: server.to_string(),
            status: probe.status,
        });
    }

    // A real mirror carries at least one of the vendor content directories
    let mut layout_found = false;
    for test_path in MIRROR_TEST_PATHS {
        let candidate = format!("{server}/{test_path}");
        match transport.probe(&candidate).await {
            Ok(p) if p.reachable() => {
                debug!(candidate, status = p.status, "mirror layout probe hit");
                layout_found = true;
                break;
            }
            Ok(p) => debug!(candidate, status = p.status, "mirror layout probe miss"),
            Err(e) => debug!(candidate, error = %e, "mirror layout probe error"),
        }
    }

    if !layout_found {
        return Err(ResolveError::MirrorLayoutMissing(server.to_string()));
    }

    info!(mirror = server, "resolved static mirror source");
    Ok(SourceDescriptor::Mirror {
        base: format!("{server}/{}", MIRROR_TEST_PATHS[0]),
    })
}

/// Join a base URL and a declared relative path, resolving leading `../`
/// components against the base.
fn join_url(base: &str, rel: &str) -> String {
    let mut base = base.trim_end_matches('/').to_string();
    let mut rel = rel;
    while let Some(stripped) = rel.strip_prefix("../") {
        if let Some(idx) = base.rfind('/') {
            base.truncate(idx);
        }
        rel = stripped;
    }
    format!("{base}/{rel}")
}

/// Filesystem flavor of [`join_url`], rooted at the image's primary
/// content directory.
fn join_path(mount: &Path, rel: &str) -> PathBuf {
    let mut base = mount.join(MIRROR_TEST_PATHS[0]);
    let mut rel = rel;
    while let Some(stripped) = rel.strip_prefix("../") {
        base.pop();
        rel = stripped;
    }
    base.join(rel)
}
