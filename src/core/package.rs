//! Canonical package entity

use crate::core::manifest::AttributeRecord;

/// One downloadable content unit, constructed from a patched attribute
/// record via [`crate::core::registry::Registry`] - the sole constructor
/// path, which is what enforces the one-instance-per-identity invariant.
/// Immutable once constructed; patches apply to the attribute record
/// before construction.
#[derive(Debug, Clone)]
pub struct Package {
    identity: String,
    /// Declared remote path, relative to the source base (may climb into a
    /// sibling content directory with a leading `../`)
    pub download_name: String,
    /// Declared payload size in bytes
    pub download_size: u64,
    /// Whether the vendor classifies this package as mandatory
    pub mandatory: bool,
    /// Ordering hint within a release
    pub sequence_number: Option<u64>,
    ignore: bool,
    /// Catalog identity this package was sourced from
    pub source_manifest: String,
}

impl Package {
    pub(crate) fn from_record(record: &AttributeRecord, manifest: &str) -> Self {
        Package {
            identity: record.identity().to_string(),
            download_name: record.download_name.clone(),
            download_size: record.download_size.unwrap_or(0),
            mandatory: record.mandatory,
            sequence_number: record.sequence_number,
            ignore: record.ignore,
            source_manifest: manifest.to_string(),
        }
    }

    /// Globally unique package identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Display name: the filename component of the declared remote path
    pub fn display_name(&self) -> &str {
        crate::filename_from_url(&self.download_name)
    }

    /// Whether a patch excluded this package from output
    pub fn ignored(&self) -> bool {
        self.ignore
    }
}
