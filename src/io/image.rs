//! Disk-image lifecycle via hdiutil
//!
//! State machine: absent -> created/mounted -> converted -> ejected.
//! Every operation is idempotent with respect to "already in the desired
//! state": creating over a leftover sparse image degrades to an
//! eject-then-remount, ejecting an already-detached mountpoint is a
//! logged no-op.

use std::path::{Path, PathBuf};
use std::process::Command;

use plist::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::VALID_IMAGE_FS;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Unsupported filesystem '{0}', choose from JHFS+ or APFS")]
    UnsupportedFilesystem(String),

    #[error("hdiutil {op} failed: {detail}")]
    Operation { op: &'static str, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse hdiutil output: {0}")]
    Plist(#[from] plist::Error),
}

/// A successfully attached image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mounted {
    pub mountpoint: PathBuf,
    pub device: String,
}

/// Thin wrapper over the hdiutil create/attach/eject/convert primitives
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDriver {
    dry_run: bool,
}

impl ImageDriver {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Create a growable sparse container and mount it. When the sparse
    /// file and the mountpoint both already exist (unclean previous run),
    /// degrade to an eject-then-remount instead of re-creating.
    pub fn create(
        &self,
        path: &Path,
        volume: &str,
        fs: &str,
        mountpoint: &Path,
    ) -> Result<Option<Mounted>, ImageError> {
        if !VALID_IMAGE_FS.contains(&fs) {
            return Err(ImageError::UnsupportedFilesystem(fs.to_string()));
        }

        let sparse = sparse_path(path);

        if self.dry_run {
            warn!(
                "Create {} ({volume}, {fs}) and mount to {}",
                sparse.display(),
                mountpoint.display()
            );
            return Ok(None);
        }

        if sparse.exists() && mountpoint.exists() {
            warn!("Unmounting existing mount point {}", mountpoint.display());
            self.eject(mountpoint)?;
            return self.mount(&sparse, mountpoint, false);
        }

        let output = Command::new("hdiutil")
            .args(["create", "-ov", "-plist", "-volname", volume, "-fs", fs])
            .args(["-attach", "-type", "SPARSE"])
            .arg(&sparse)
            .output()?;

        debug!("hdiutil create ({})", output.status);

        if !output.status.success() {
            return Err(ImageError::Operation {
                op: "create",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        warn!("Created temporary sparse image {}", sparse.display());
        let mounted = mount_device(&output.stdout)?;
        if let Some(m) = &mounted {
            warn!("Mounted sparse image to {}", m.mountpoint.display());
        }
        Ok(mounted)
    }

    /// Attach an existing container. Returns `None` when hdiutil refuses
    /// the attach (bad image, busy mountpoint).
    pub fn mount(
        &self,
        path: &Path,
        mountpoint: &Path,
        read_only: bool,
    ) -> Result<Option<Mounted>, ImageError> {
        if self.dry_run {
            warn!("Mount {} to {}", path.display(), mountpoint.display());
            return Ok(None);
        }

        let mut cmd = Command::new("hdiutil");
        cmd.arg("attach");
        if read_only {
            cmd.arg("-readonly");
        }
        cmd.arg("-mountpoint").arg(mountpoint).arg("-plist").arg(path);

        let output = cmd.output()?;
        debug!("hdiutil attach ({})", output.status);

        if !output.status.success() {
            info!("{}", String::from_utf8_lossy(&output.stderr).trim());
            return Ok(None);
        }

        let mounted = mount_device(&output.stdout)?;
        if let Some(m) = &mounted {
            warn!("Mounted {} to {}", path.display(), m.mountpoint.display());
        }
        Ok(mounted)
    }

    /// Detach a mountpoint. Already-detached is success, never an error.
    pub fn eject(&self, mountpoint: &Path) -> Result<(), ImageError> {
        if self.dry_run {
            warn!("Unmount {}", mountpoint.display());
            return Ok(());
        }

        if !mountpoint.exists() {
            warn!(
                "Cannot unmount {} - it does not exist",
                mountpoint.display()
            );
            return Ok(());
        }

        // Detach can transiently fail on a busy volume
        for attempt in 0..3 {
            let output = Command::new("hdiutil").arg("eject").arg(mountpoint).output()?;
            debug!("hdiutil eject ({})", output.status);

            if output.status.success() {
                info!("Unmounted {}", mountpoint.display());
                return Ok(());
            }

            if attempt < 2 {
                std::thread::sleep(std::time::Duration::from_millis(500));
            }
        }

        Err(ImageError::Operation {
            op: "eject",
            detail: format!("failed to detach {}", mountpoint.display()),
        })
    }

    /// Convert a sparse container to a compressed final image. Forces a
    /// clean detach of the mountpoint first. Returns `None` when hdiutil
    /// reports failure; the caller decides whether that is run-fatal.
    pub fn convert(
        &self,
        sparse: &Path,
        output_path: &Path,
        mountpoint: &Path,
    ) -> Result<Option<PathBuf>, ImageError> {
        if self.dry_run {
            warn!(
                "Convert {} to {}",
                sparse.display(),
                output_path.display()
            );
            return Ok(None);
        }

        info!("Converting {}", sparse.display());
        self.eject(mountpoint)?;

        let output = Command::new("hdiutil")
            .args(["convert", "-ov", "-quiet"])
            .arg(sparse)
            .args(["-format", "UDZO", "-o"])
            .arg(output_path)
            .output()?;

        debug!("hdiutil convert ({})", output.status);

        if output.status.success() {
            info!("Created {}", output_path.display());
            Ok(Some(output_path.to_path_buf()))
        } else {
            info!("{}", String::from_utf8_lossy(&output.stderr).trim());
            Ok(None)
        }
    }
}

/// Give a container path the `.sparseimage` suffix hdiutil produces
pub fn sparse_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "sparseimage") {
        path.to_path_buf()
    } else {
        let mut p = path.as_os_str().to_owned();
        p.push(".sparseimage");
        PathBuf::from(p)
    }
}

/// Extract (mount-point, device) from hdiutil's `-plist` output. The
/// entity carrying both keys is the mounted volume.
fn mount_device(stdout: &[u8]) -> Result<Option<Mounted>, ImageError> {
    let root = Value::from_reader(std::io::Cursor::new(stdout))?;

    let entities = root
        .as_dictionary()
        .and_then(|d| d.get("system-entities"))
        .and_then(Value::as_array);

    let Some(entities) = entities else {
        return Ok(None);
    };

    for entity in entities {
        let Some(dict) = entity.as_dictionary() else {
            continue;
        };
        let mount = dict.get("mount-point").and_then(Value::as_string);
        let device = dict.get("dev-entry").and_then(Value::as_string);

        if let (Some(mount), Some(device)) = (mount, device) {
            return Ok(Some(Mounted {
                mountpoint: PathBuf::from(mount),
                device: device.to_string(),
            }));
        }
    }

    Ok(None)
}
