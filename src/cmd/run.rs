//! Download / deploy command
//!
//! Wires the resolution phase (fetch catalogs -> parse -> patch ->
//! register) to the deployment phase (resolve source -> transfer ->
//! verify -> cleanup), optionally inside the disk-image build lifecycle.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info, warn};

use loopfetch::core::catalog;
use loopfetch::core::manifest;
use loopfetch::core::patch::{self, PatchOptions, PatchSet, Selection};
use loopfetch::io::image::ImageDriver;
use loopfetch::io::transport::Transport;
use loopfetch::ops::deploy::{DeployConfig, Deployment};
use loopfetch::ops::resolve::{self, SourceConfig, SourceDescriptor};
use loopfetch::ops::RunError;
use loopfetch::Registry;
use loopfetch::{IMAGE_MOUNT, IMAGE_VOLUME_NAME};

/// Options shared by `download` and `deploy`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub apps: Vec<String>,
    pub plists: Vec<String>,
    pub packages: Vec<String>,
    pub mandatory: bool,
    pub optional: bool,
    pub cache_server: Option<String>,
    pub pkg_server: Option<String>,
    pub patch_file: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub build_image: Option<PathBuf>,
    pub apfs: bool,
    pub insecure: bool,
    pub dry_run: bool,
    pub quiet: bool,
}

pub async fn run(mut opts: RunOptions, deployment: bool) -> Result<(), RunError> {
    // Argument cross-checks, surfaced before any network activity
    if deployment && !opts.dry_run && !is_root() {
        return Err(RunError::PrivilegeRequired);
    }
    if !(opts.mandatory || opts.optional) && opts.packages.is_empty() {
        return Err(RunError::NoSelection);
    }
    if opts.apfs && opts.build_image.is_none() {
        return Err(RunError::ApfsWithoutBuild);
    }

    // Deployment with no apps named defaults to all of them
    if deployment && opts.apps.is_empty() && opts.plists.is_empty() && opts.packages.is_empty() {
        opts.apps = vec!["all".to_string()];
    }

    let manifests = select_manifests(&opts)?;
    let explicit_packages = !opts.packages.is_empty();

    let transport = Transport::new(opts.insecure)?;

    let source_config = SourceConfig {
        pkg_server: opts.pkg_server.clone(),
        cache_server: opts.cache_server.clone(),
    };
    let source = resolve::resolve(&source_config, &transport).await?;

    let driver = ImageDriver::new(opts.dry_run);

    // Optional sparse-image construction: the mountpoint becomes the
    // destination and the run's sole deliverable is the converted image.
    let mut destination = opts
        .destination
        .clone()
        .unwrap_or_else(loopfetch::default_destination);

    if let Some(image) = &opts.build_image {
        let fs = if opts.apfs { "APFS" } else { "JHFS+" };
        let mounted = driver.create(
            image,
            IMAGE_VOLUME_NAME,
            fs,
            std::path::Path::new(IMAGE_MOUNT),
        )?;
        destination = mounted
            .map(|m| m.mountpoint)
            .unwrap_or_else(|| PathBuf::from(IMAGE_MOUNT));
    }

    // A disk-image source is consumed through its mountpoint
    if let SourceDescriptor::Image { path, mount } = &source {
        driver.mount(std::path::Path::new(path), mount, true)?;
    }

    // Explicit-package mode bypasses the patch overlay entirely
    let patches = if explicit_packages {
        PatchSet::none()
    } else {
        PatchSet::load(opts.patch_file.as_deref())?
    };

    let patch_opts = PatchOptions {
        selection: match (opts.mandatory, opts.optional) {
            (true, false) => Selection::Mandatory,
            (false, true) => Selection::Optional,
            _ => Selection::Both,
        },
        only: explicit_packages.then(|| opts.packages.clone()),
    };

    if !opts.quiet {
        println!("Analysing...");
    }

    // Resolution phase: one registry across all catalogs in the run
    let mut registry = Registry::new();
    let mut package_set = Vec::new();
    let catalog_dest = catalog_dir(opts.dry_run, &destination);

    for name in &manifests {
        // Catalog fetches are never dry-run: resolution needs real bytes
        let bytes = match fetch_manifest(&transport, name, &catalog_dest).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("{name}: {e} - skipping catalog");
                continue;
            }
        };

        let records = match manifest::parse(&bytes, name) {
            Ok(records) => records,
            Err(e) => {
                error!("{name}: {e} - skipping catalog");
                continue;
            }
        };

        match patch::patch(records, name, &patches, &mut registry, &patch_opts) {
            Ok(packages) => package_set.extend(packages),
            Err(e) => error!("{name}: {e} - skipping catalog"),
        }
    }

    let total_bytes: u64 = package_set.iter().map(|p| p.download_size).sum();
    if !opts.quiet {
        println!(
            "{} packages to process ({})",
            package_set.len(),
            loopfetch::core::compare::format_size(total_bytes)
        );
    }

    // Deployment phase
    let mut config = DeployConfig::new(destination);
    config.dry_run = opts.dry_run;
    config.deployment = deployment;
    config.force_fresh = explicit_packages;
    config.keep_destination = opts.build_image.is_some();

    let mut deployer = Deployment::new(&transport, source, config);

    for package in &package_set {
        // Per-package failures are counted and the batch continues
        if let Err(e) = deployer.process(package).await {
            warn!("{}: {e}", package.display_name());
        }
    }

    info!("{}", deployer.summary().report());
    if !opts.quiet {
        println!("{}", deployer.summary().report());
    }

    if deployment {
        deployer.tidy_up(&driver).await?;
    }

    if let Some(image) = &opts.build_image {
        let sparse = loopfetch::io::image::sparse_path(image);
        let converted =
            driver.convert(&sparse, image, std::path::Path::new(IMAGE_MOUNT))?;
        if converted.is_none() && !opts.dry_run {
            // The image is this run's sole deliverable
            return Err(RunError::ImageConversionFailed);
        }
    }

    Ok(())
}

/// Expand apps/plists arguments into the ordered catalog list:
/// family groups in fixed order, newest first within a family.
fn select_manifests(opts: &RunOptions) -> Result<Vec<String>, RunError> {
    let mut manifests: Vec<String> = Vec::new();

    // Explicit package mode searches every known catalog
    if !opts.packages.is_empty() {
        for family in catalog::AppFamily::ALL {
            manifests.extend(
                family
                    .manifests()
                    .iter()
                    .map(|m| format!("{m}.plist")),
            );
        }
        return Ok(catalog::order_manifests(&manifests));
    }

    let all_apps = opts.apps.iter().any(|a| a == "all");
    for family in catalog::AppFamily::ALL {
        if all_apps || opts.apps.iter().any(|a| a == family.prefix()) {
            manifests.push(format!("{}.plist", family.latest()));
        }
    }

    for plist in &opts.plists {
        match catalog::resolve_source(plist) {
            Some(canonical) => manifests.push(canonical),
            None => error!("'{plist}' is not a known catalog source - skipping"),
        }
    }

    let mut ordered = catalog::order_manifests(&manifests);
    ordered.dedup();
    Ok(ordered)
}

/// Where catalog files land. A dry run keeps them out of the destination
/// tree, which may be an unmounted image mountpoint.
fn catalog_dir(dry_run: bool, destination: &Path) -> PathBuf {
    if dry_run {
        loopfetch::default_destination()
    } else {
        destination.to_path_buf()
    }
}

/// Fetch one catalog to the destination tree and return its bytes
async fn fetch_manifest(
    transport: &Transport,
    name: &str,
    destination: &Path,
) -> Result<Vec<u8>, RunError> {
    let url = catalog::feed_url(name);
    let dest = destination.join(name);
    // Catalog files never resume: the origin does not serve ranges for them
    transport.fetch(&url, &dest, None).await?;
    Ok(tokio::fs::read(&dest).await?)
}

/// Effective-uid root check, via id(1) so the crate stays free of unsafe
fn is_root() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}
