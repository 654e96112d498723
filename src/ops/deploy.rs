//! Deployment orchestrator
//!
//! Drives one pass per package over {resolve source -> transfer ->
//! verify}, then a final cleanup pass. One bad package never aborts the
//! batch: transfer failures are counted and the run continues. An
//! interrupted transfer leaves its partial file in place so a later run
//! can resume it.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::compare::format_size;
use crate::core::package::Package;
use crate::io::image::ImageDriver;
use crate::io::transport::{Transport, TransferError};
use crate::ops::resolve::{Location, SourceDescriptor};
use crate::{MIRROR_TEST_PATHS, ORIGIN_URL};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-package outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentResult {
    /// Payload transferred (byte count as written)
    Deployed(u64),
    /// Destination already held the payload at the declared size
    AlreadySatisfied,
    /// Dry run - resolution and logging only, no transfer
    Simulated,
}

/// End-of-run counters
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub deployed: usize,
    pub already_satisfied: usize,
    pub simulated: usize,
    pub failed: usize,
    pub size_mismatches: usize,
    pub bytes_transferred: u64,
}

impl RunSummary {
    pub fn report(&self) -> String {
        format!(
            "{deployed} deployed, {satisfied} already present, {failed} failed ({size} transferred)",
            deployed = self.deployed + self.simulated,
            satisfied = self.already_satisfied,
            failed = self.failed,
            size = format_size(self.bytes_transferred),
        )
    }
}

/// Run options for the orchestrator
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Local destination root the content tree is written under
    pub destination: PathBuf,
    /// Resolve and log, but issue no transfers
    pub dry_run: bool,
    /// Actual deployment (enables end-of-run cleanup) vs download-only
    pub deployment: bool,
    /// Never resume a partial file (explicit-package mode)
    pub force_fresh: bool,
    /// The destination is a lifecycle-managed mountpoint whose content
    /// becomes the run's deliverable; cleanup must not delete it
    pub keep_destination: bool,
    /// Origin base used for per-package fallback
    pub origin_base: String,
}

impl DeployConfig {
    pub fn new(destination: PathBuf) -> Self {
        Self {
            destination,
            dry_run: false,
            deployment: false,
            force_fresh: false,
            keep_destination: false,
            origin_base: ORIGIN_URL.to_string(),
        }
    }
}

/// Drives transfers for one run. Holds the resolved source descriptor
/// and the running counters.
#[derive(Debug)]
pub struct Deployment<'a> {
    transport: &'a Transport,
    source: SourceDescriptor,
    config: DeployConfig,
    summary: RunSummary,
}

impl<'a> Deployment<'a> {
    pub fn new(transport: &'a Transport, source: SourceDescriptor, config: DeployConfig) -> Self {
        Self {
            transport,
            source,
            config,
            summary: RunSummary::default(),
        }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Local destination for a package, mirroring the vendor's content
    /// directory layout under the destination root.
    fn local_dest(&self, package: &Package) -> PathBuf {
        let mut base = self.config.destination.join(MIRROR_TEST_PATHS[0]);
        let mut rel = package.download_name.as_str();
        while let Some(stripped) = rel.strip_prefix("../") {
            base.pop();
            rel = stripped;
        }
        base.join(rel)
    }

    /// Process one package: skip when already satisfied, otherwise
    /// transfer (resumable for package payloads) and verify the declared
    /// size. Transfer errors are counted and returned; the caller is
    /// expected to continue with the next package.
    pub async fn process(&mut self, package: &Package) -> Result<DeploymentResult, DeployError> {
        let dest = self.local_dest(package);

        // Idempotence: a destination file at the declared size is done
        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            if meta.len() == package.download_size && package.download_size > 0 {
                debug!(
                    "{} already at {} ({}), skipping transfer",
                    package.display_name(),
                    dest.display(),
                    format_size(meta.len()),
                );
                self.summary.already_satisfied += 1;
                return Ok(DeploymentResult::AlreadySatisfied);
            }
        }

        let location = self.source.package_location(package);

        if self.config.dry_run {
            match &location {
                Location::Url(url) => info!("Download {url}"),
                Location::Path(path) => info!("Copy {}", path.display()),
            }
            self.summary.simulated += 1;
            return Ok(DeploymentResult::Simulated);
        }

        let written = match self.transfer(package, &location, &dest).await {
            Ok(written) => written,
            Err(e) => {
                warn!("{}: {e}", package.display_name());
                self.summary.failed += 1;
                return Err(e);
            }
        };

        // Declared-size verification is advisory: a mismatch is logged
        // and the run continues.
        if package.download_size > 0 && written != package.download_size {
            warn!(
                "{}: size mismatch, expected {} got {}",
                package.display_name(),
                format_size(package.download_size),
                format_size(written),
            );
            self.summary.size_mismatches += 1;
        }

        self.summary.deployed += 1;
        self.summary.bytes_transferred += written;
        Ok(DeploymentResult::Deployed(written))
    }

    async fn transfer(
        &self,
        package: &Package,
        location: &Location,
        dest: &Path,
    ) -> Result<u64, DeployError> {
        match location {
            Location::Path(src) => {
                if src.exists() {
                    if let Some(parent) = dest.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    info!("Copying {}", src.display());
                    return Ok(tokio::fs::copy(src, dest).await?);
                }
                // The image does not carry this one package
                let fallback = self
                    .source
                    .revalidate(package, self.transport, &self.config.origin_base)
                    .await;
                self.fetch_from(&fallback, package, dest).await
            }
            Location::Url(url) => {
                let resume_from = self.resume_offset(package, dest).await;
                info!("Downloading {url}");
                match self.transport.fetch(url, dest, resume_from).await {
                    Ok(written) => Ok(written),
                    // The bulk source may not carry this one package;
                    // revalidate once before failing.
                    Err(e) if !matches!(self.source, SourceDescriptor::Origin { .. }) => {
                        debug!("{e}; revalidating source for {}", package.display_name());
                        let fallback = self
                            .source
                            .revalidate(package, self.transport, &self.config.origin_base)
                            .await;
                        if fallback == self.source {
                            return Err(e.into());
                        }
                        self.fetch_from(&fallback, package, dest).await
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn fetch_from(
        &self,
        source: &SourceDescriptor,
        package: &Package,
        dest: &Path,
    ) -> Result<u64, DeployError> {
        match source.package_location(package) {
            Location::Url(url) => {
                let resume_from = self.resume_offset(package, dest).await;
                info!("Downloading {url}");
                Ok(self.transport.fetch(&url, dest, resume_from).await?)
            }
            Location::Path(src) => {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                info!("Copying {}", src.display());
                Ok(tokio::fs::copy(src, dest).await?)
            }
        }
    }

    /// Resume from an existing partial file, but only for package
    /// payloads - catalog-style files are always fetched fresh, and
    /// explicit-package mode forces a fresh fetch.
    async fn resume_offset(&self, package: &Package, dest: &Path) -> Option<u64> {
        if self.config.force_fresh || !package.download_name.ends_with(".pkg") {
            return None;
        }
        let len = tokio::fs::metadata(dest).await.ok()?.len();
        (len > 0).then_some(len)
    }

    /// End-of-run cleanup: eject any transient image mount and remove the
    /// partial-state tree - only for actual deployments, since a
    /// download-only run's artifacts are the intended output.
    pub async fn tidy_up(&self, driver: &ImageDriver) -> Result<(), DeployError> {
        if !self.config.deployment {
            debug!("download-only run, leaving artifacts in place");
            return Ok(());
        }

        if let SourceDescriptor::Image { mount, .. } = &self.source {
            if let Err(e) = driver.eject(mount) {
                warn!("cleanup: {e}");
            }
        }

        // An image-build destination is the mountpoint of the deliverable;
        // the conversion step ejects it instead.
        if self.config.keep_destination {
            debug!("destination is a managed mountpoint, leaving it to eject");
            return Ok(());
        }

        if self.config.destination.exists() && !self.config.dry_run {
            info!(
                "Removing transient destination {}",
                self.config.destination.display()
            );
            tokio::fs::remove_dir_all(&self.config.destination).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::AttributeRecord;

    fn package(download_name: &str, size: u64) -> Package {
        let record = AttributeRecord {
            name: "X".into(),
            download_name: download_name.to_string(),
            download_size: Some(size),
            mandatory: true,
            ..Default::default()
        };
        Package::from_record(&record, "garageband1021.plist")
    }

    fn config(dir: &Path) -> DeployConfig {
        DeployConfig::new(dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_existing_file_at_declared_size_skips_transfer() {
        let mut server = mockito::Server::new_async().await;
        let never = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lp10_ms3_content_2016/X.pkg");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, "12345").unwrap();

        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin_at(&server.url()),
            config(dir.path()),
        );

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::AlreadySatisfied);
        assert_eq!(deployment.summary().already_satisfied, 1);
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_transfer() {
        let mut server = mockito::Server::new_async().await;
        let never = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.dry_run = true;

        let transport = Transport::new(false).unwrap();
        let mut deployment =
            Deployment::new(&transport, SourceDescriptor::origin_at(&server.url()), cfg);

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::Simulated);
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_transfer_and_size_verification() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .with_status(200)
            .with_body("abc")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin_at(&format!("{}/lp10_ms3_content_2016", server.url())),
            config(dir.path()),
        );

        // Declared size disagrees with the body: logged, not fatal
        let result = deployment.process(&package("X.pkg", 999)).await.unwrap();
        assert_eq!(result, DeploymentResult::Deployed(3));
        assert_eq!(deployment.summary().size_mismatches, 1);
        assert_eq!(deployment.summary().deployed, 1);
    }

    #[tokio::test]
    async fn test_resume_continues_from_partial_length() {
        let mut server = mockito::Server::new_async().await;
        let ranged = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .match_header("Range", "bytes=3-")
            .with_status(206)
            .with_body("45")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lp10_ms3_content_2016/X.pkg");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, "123").unwrap();

        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin_at(&format!("{}/lp10_ms3_content_2016", server.url())),
            config(dir.path()),
        );

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::Deployed(5));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "12345");
        ranged.assert_async().await;
    }

    #[tokio::test]
    async fn test_force_fresh_never_resumes() {
        let mut server = mockito::Server::new_async().await;
        // A resumed fetch would carry a Range header; expect a plain GET
        let fresh = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .match_header("Range", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("12345")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lp10_ms3_content_2016/X.pkg");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, "123").unwrap();

        let transport = Transport::new(false).unwrap();
        let mut cfg = config(dir.path());
        cfg.force_fresh = true;
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin_at(&format!("{}/lp10_ms3_content_2016", server.url())),
            cfg,
        );

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::Deployed(5));
        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_mirror_miss_falls_back_to_origin_for_one_package() {
        let mut mirror = mockito::Server::new_async().await;
        let _miss = mirror
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .with_status(404)
            .create_async()
            .await;

        let mut origin = mockito::Server::new_async().await;
        let hit = origin
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .with_status(200)
            .with_body("12345")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.origin_base = format!("{}/lp10_ms3_content_2016", origin.url());

        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::Mirror {
                base: format!("{}/lp10_ms3_content_2016", mirror.url()),
            },
            cfg,
        );

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::Deployed(5));
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_transfer_counts_and_propagates() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin_at(&format!("{}/lp10_ms3_content_2016", server.url())),
            config(dir.path()),
        );

        let result = deployment.process(&package("X.pkg", 5)).await;
        assert!(result.is_err());
        assert_eq!(deployment.summary().failed, 1);
    }

    #[tokio::test]
    async fn test_image_source_miss_falls_back_to_origin() {
        let mut origin = mockito::Server::new_async().await;
        let hit = origin
            .mock("GET", "/lp10_ms3_content_2016/X.pkg")
            .with_status(200)
            .with_body("12345")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        // Mounted tree exists but does not carry the package
        let mount = dir.path().join("mount");
        std::fs::create_dir_all(&mount).unwrap();

        let mut cfg = config(&dir.path().join("dest"));
        cfg.origin_base = format!("{}/lp10_ms3_content_2016", origin.url());

        let transport = Transport::new(false).unwrap();
        let mut deployment = Deployment::new(
            &transport,
            SourceDescriptor::Image {
                path: "/tmp/loops.dmg".to_string(),
                mount,
            },
            cfg,
        );

        let result = deployment.process(&package("X.pkg", 5)).await.unwrap();
        assert_eq!(result, DeploymentResult::Deployed(5));
        hit.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_only_run_keeps_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lp10_ms3_content_2016");
        std::fs::create_dir_all(&dest).unwrap();

        let transport = Transport::new(false).unwrap();
        let deployment = Deployment::new(
            &transport,
            SourceDescriptor::origin(),
            config(dir.path()),
        );

        deployment.tidy_up(&ImageDriver::new(false)).await.unwrap();
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn test_deployment_run_removes_transient_destination() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("staging");
        std::fs::create_dir_all(root.join("lp10_ms3_content_2016")).unwrap();

        let transport = Transport::new(false).unwrap();
        let mut cfg = config(&root);
        cfg.deployment = true;
        let deployment = Deployment::new(&transport, SourceDescriptor::origin(), cfg);

        deployment.tidy_up(&ImageDriver::new(false)).await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_image_build_destination_survives_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mountpoint = dir.path().join("mount");
        std::fs::create_dir_all(mountpoint.join("lp10_ms3_content_2016")).unwrap();

        let transport = Transport::new(false).unwrap();
        let mut cfg = config(&mountpoint);
        cfg.deployment = true;
        cfg.keep_destination = true;
        let deployment = Deployment::new(&transport, SourceDescriptor::origin(), cfg);

        deployment.tidy_up(&ImageDriver::new(false)).await.unwrap();
        // The deployed tree is what gets converted into the image
        assert!(mountpoint.join("lp10_ms3_content_2016").exists());
    }
}
