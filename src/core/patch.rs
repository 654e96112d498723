//! Patch overlay engine
//!
//! Vendor catalogs carry per-source metadata errors (wrong sizes, stale
//! paths, packages that should never ship). Corrections live in an
//! independently authored YAML document keyed by catalog identity, then
//! by package entry name. Overrides apply key-wise to the attribute
//! record before the package becomes canonical.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::catalog;
use crate::core::manifest::AttributeRecord;
use crate::core::package::Package;
use crate::core::registry::{Registered, Registry};

/// Patch document shipped with the binary; an operator-supplied file
/// replaces it wholesale.
const DEFAULT_PATCHES: &str = include_str!("../resources/patches.yaml");

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("'{0}' is not a known catalog source")]
    UnknownSource(String),

    #[error("Failed to read patch document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed patch document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Partial attribute override for one package
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchEntry {
    #[serde(rename = "DownloadName")]
    pub download_name: Option<String>,
    #[serde(rename = "DownloadSize")]
    pub download_size: Option<u64>,
    #[serde(rename = "PackageID")]
    pub package_id: Option<String>,
    #[serde(rename = "IsMandatory")]
    pub mandatory: Option<bool>,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: Option<u64>,
    #[serde(rename = "BadWolfIgnore")]
    pub ignore: Option<bool>,
}

impl PatchEntry {
    /// Key-wise override: keys present in the patch replace the record's,
    /// keys absent leave the record untouched.
    fn apply(&self, record: &mut AttributeRecord) {
        if let Some(name) = &self.download_name {
            record.download_name = name.clone();
        }
        if let Some(size) = self.download_size {
            record.download_size = Some(size);
        }
        if let Some(id) = &self.package_id {
            record.package_id = Some(id.clone());
        }
        if let Some(mandatory) = self.mandatory {
            record.mandatory = mandatory;
        }
        if let Some(seq) = self.sequence_number {
            record.sequence_number = Some(seq);
        }
        if let Some(ignore) = self.ignore {
            record.ignore = ignore;
        }
    }
}

/// Catalog identity -> package entry name -> overrides. Read once per run,
/// read-only afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchSet(HashMap<String, HashMap<String, PatchEntry>>);

impl PatchSet {
    /// Load the embedded default patch document
    pub fn embedded() -> Result<Self, PatchError> {
        Ok(serde_yaml::from_str(DEFAULT_PATCHES)?)
    }

    /// Load an operator-supplied patch document, or the embedded default
    /// when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, PatchError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(serde_yaml::from_str(&content)?)
            }
            None => Self::embedded(),
        }
    }

    /// An empty set, for runs that bypass patching
    pub fn none() -> Self {
        Self::default()
    }

    fn for_manifest(&self, manifest: &str) -> Option<&HashMap<String, PatchEntry>> {
        self.0.get(manifest)
    }
}

/// Which mandatory/optional class of packages a run wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Mandatory,
    Optional,
    Both,
}

impl Selection {
    fn retains(self, mandatory: bool) -> bool {
        match self {
            Selection::Mandatory => mandatory,
            Selection::Optional => !mandatory,
            Selection::Both => true,
        }
    }
}

/// Per-run patching options
#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub selection: Selection,
    /// Restrict output to these download names (explicit package mode)
    pub only: Option<Vec<String>>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            selection: Selection::Both,
            only: None,
        }
    }
}

/// Filter, patch, and register one catalog's records against the run-wide
/// registry. Returns the canonical packages this catalog contributed,
/// in source order - ignored packages are registered (so their identity
/// stays seen) but excluded from the returned set.
pub fn patch(
    records: Vec<AttributeRecord>,
    source: &str,
    patches: &PatchSet,
    registry: &mut Registry,
    opts: &PatchOptions,
) -> Result<Vec<Package>, PatchError> {
    let manifest = catalog::resolve_source(source)
        .ok_or_else(|| PatchError::UnknownSource(source.to_string()))?;

    let overrides = patches.for_manifest(&manifest);

    // Selection runs first so patch lookups only touch candidates
    // actually destined for output.
    let candidates: Vec<AttributeRecord> = records
        .into_iter()
        .filter(|r| opts.selection.retains(r.mandatory))
        .filter(|r| {
            opts.only.as_ref().is_none_or(|names| {
                names
                    .iter()
                    .any(|n| r.name == *n || crate::filename_from_url(&r.download_name) == n)
            })
        })
        .collect();

    let total = candidates.len();
    info!(manifest, total, "processing catalog");

    let mut result = Vec::with_capacity(total);

    for (i, mut record) in candidates.into_iter().enumerate() {
        debug!(
            "processing ({count} of {total}) - {id}",
            count = i + 1,
            id = record.identity()
        );

        if record.download_name.is_empty() {
            warn!(entry = %record.name, "record has no download name - skipping");
            continue;
        }

        // Dedup gate: first manifest to declare an identity wins. No
        // patch lookup, no construction for a seen identity.
        if registry.contains(record.identity()) {
            debug!("already processed {} - skipping", record.identity());
            continue;
        }

        if let Some(entry) = overrides.and_then(|o| o.get(&record.name)) {
            entry.apply(&mut record);
            debug!(entry = %record.name, "patched attributes");
        }

        if let Registered::New(package) = registry.register(&record, &manifest) {
            if !package.ignored() {
                result.push(package.clone());
            }
        }
    }

    Ok(result)
}
