//! Package registry
//!
//! Owns the run-wide identity -> [`Package`] association and is the sole
//! constructor path for packages. A later manifest redeclaring an
//! already-seen identity gets the existing instance back, never a
//! duplicate. Not safe for unsynchronized concurrent use; the pipeline
//! runs this stage single-threaded.

use std::collections::HashMap;

use crate::core::manifest::AttributeRecord;
use crate::core::package::Package;

/// Outcome of a [`Registry::register`] call
#[derive(Debug)]
pub enum Registered<'a> {
    /// The identity was unseen; a new package was constructed
    New(&'a Package),
    /// The identity was already registered; this is the existing instance
    Existing(&'a Package),
}

impl Registered<'_> {
    pub fn package(&self) -> &Package {
        match self {
            Registered::New(p) | Registered::Existing(p) => p,
        }
    }
}

/// Run-wide deduplicating package store
#[derive(Debug, Default)]
pub struct Registry {
    packages: HashMap<String, Package>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the record's identity has already been registered
    pub fn contains(&self, identity: &str) -> bool {
        self.packages.contains_key(identity)
    }

    /// Construct a package from a patched record, or return the existing
    /// instance when the identity has been seen before.
    pub fn register(&mut self, record: &AttributeRecord, manifest: &str) -> Registered<'_> {
        let identity = record.identity().to_string();
        match self.packages.entry(identity) {
            std::collections::hash_map::Entry::Occupied(e) => Registered::Existing(e.into_mut()),
            std::collections::hash_map::Entry::Vacant(e) => {
                Registered::New(e.insert(Package::from_record(record, manifest)))
            }
        }
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> AttributeRecord {
        AttributeRecord {
            name: id.to_string(),
            download_name: format!("{id}.pkg"),
            download_size: Some(100),
            package_id: Some(format!("com.vendor.{id}")),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_constructs_once() {
        let mut registry = Registry::new();
        let r = record("A");

        assert!(matches!(
            registry.register(&r, "garageband1022.plist"),
            Registered::New(_)
        ));
        assert!(matches!(
            registry.register(&r, "garageband1021.plist"),
            Registered::Existing(_)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_existing_keeps_first_manifest_attribution() {
        let mut registry = Registry::new();
        registry.register(&record("A"), "garageband1022.plist");

        // The stale redeclaration from an older catalog must not replace
        // the instance the newer catalog produced.
        let again = registry.register(&record("A"), "garageband1021.plist");
        assert_eq!(again.package().source_manifest, "garageband1022.plist");
    }

    #[test]
    fn test_contains_uses_record_identity() {
        let mut registry = Registry::new();
        registry.register(&record("A"), "garageband1022.plist");
        assert!(registry.contains("com.vendor.A"));
        assert!(!registry.contains("com.vendor.B"));
    }
}
