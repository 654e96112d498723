//! Vendor catalog parsing
//!
//! Converts raw catalog bytes (Apple property lists) into an ordered
//! sequence of [`AttributeRecord`]s. Decoding the plist byte format itself
//! is delegated to the `plist` crate; this module only walks the resulting
//! tree. Unknown keys are carried through untouched so newer catalogs
//! never break older builds.

use plist::{Dictionary, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Catalog is not a well-formed property list: {0}")]
    Plist(#[from] plist::Error),

    #[error("Catalog {0} has no 'Packages' dictionary")]
    MissingPackages(String),
}

/// One catalog entry prior to patching: the recognized attributes plus a
/// passthrough bucket for everything we do not interpret.
///
/// Transient - consumed by the patch overlay and discarded.
#[derive(Debug, Clone, Default)]
pub struct AttributeRecord {
    /// Entry key in the catalog's `Packages` dictionary
    pub name: String,
    /// `DownloadName` - filename (optionally prefixed with a relative dir)
    pub download_name: String,
    /// `DownloadSize` - declared payload size in bytes
    pub download_size: Option<u64>,
    /// `PackageID` - globally unique payload identifier
    pub package_id: Option<String>,
    /// `IsMandatory`
    pub mandatory: bool,
    /// `sequenceNumber` - ordering hint within a release
    pub sequence_number: Option<u64>,
    /// Exclude from output (set by a patch, never by the vendor)
    pub ignore: bool,
    /// Unrecognized keys, passed through unused
    pub extra: Dictionary,
}

impl AttributeRecord {
    /// The identity packages are deduplicated by: the payload identifier
    /// when the vendor declares one, the download name otherwise.
    pub fn identity(&self) -> &str {
        self.package_id.as_deref().unwrap_or(&self.download_name)
    }

    fn from_entry(name: &str, attrs: &Dictionary) -> Self {
        let mut record = AttributeRecord {
            name: name.to_string(),
            ..Default::default()
        };

        for (key, value) in attrs {
            match key.as_str() {
                "DownloadName" => {
                    if let Some(s) = value.as_string() {
                        record.download_name = s.to_string();
                    }
                }
                "DownloadSize" => {
                    record.download_size = value.as_unsigned_integer();
                }
                "PackageID" => {
                    if let Some(s) = value.as_string() {
                        record.package_id = Some(s.to_string());
                    }
                }
                "IsMandatory" => {
                    record.mandatory = value.as_boolean().unwrap_or(false);
                }
                "sequenceNumber" => {
                    record.sequence_number = value.as_unsigned_integer();
                }
                "BadWolfIgnore" => {
                    record.ignore = value.as_boolean().unwrap_or(false);
                }
                _ => {
                    record.extra.insert(key.clone(), value.clone());
                }
            }
        }

        record
    }
}

/// Parse raw catalog bytes into attribute records, preserving source order
/// (which encodes release sequencing). Entries that nest their own
/// `Packages` dictionary (bundled sub-releases) are recursed in place.
pub fn parse(bytes: &[u8], manifest: &str) -> Result<Vec<AttributeRecord>, ParseError> {
    let root = Value::from_reader(std::io::Cursor::new(bytes))?;

    let packages = root
        .as_dictionary()
        .and_then(|d| d.get("Packages"))
        .and_then(Value::as_dictionary)
        .ok_or_else(|| ParseError::MissingPackages(manifest.to_string()))?;

    let mut records = Vec::with_capacity(packages.len());
    collect(packages, &mut records);

    tracing::debug!(manifest, count = records.len(), "parsed catalog");

    Ok(records)
}

fn collect(packages: &Dictionary, out: &mut Vec<AttributeRecord>) {
    for (name, value) in packages {
        let Some(attrs) = value.as_dictionary() else {
            continue;
        };

        if let Some(nested) = attrs.get("Packages").and_then(Value::as_dictionary) {
            collect(nested, out);
        } else {
            out.push(AttributeRecord::from_entry(name, attrs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const EXAMPLE_CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Packages</key>
    <dict>
        <key>MAContent10_AssetPack_0001</key>
        <dict>
            <key>DownloadName</key>
            <string>MAContent10_AssetPack_0001.pkg</string>
            <key>DownloadSize</key>
            <integer>1048576</integer>
            <key>PackageID</key>
            <string>com.apple.pkg.MAContent10_AssetPack_0001</string>
            <key>IsMandatory</key>
            <true/>
            <key>FileCheck</key>
            <string>/Library/Audio/Check</string>
        </dict>
        <key>MAContent10_AssetPack_0002</key>
        <dict>
            <key>DownloadName</key>
            <string>../lp10_ms3_content_2013/MAContent10_AssetPack_0002.pkg</string>
            <key>DownloadSize</key>
            <integer>2048</integer>
            <key>PackageID</key>
            <string>com.apple.pkg.MAContent10_AssetPack_0002</string>
            <key>sequenceNumber</key>
            <integer>7</integer>
        </dict>
    </dict>
</dict>
</plist>"#;

    #[test]
    fn test_parse_catalog_preserves_order() {
        let records = parse(EXAMPLE_CATALOG.as_bytes(), "garageband1021.plist").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].download_name, "MAContent10_AssetPack_0001.pkg");
        assert_eq!(records[1].sequence_number, Some(7));
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let records = parse(EXAMPLE_CATALOG.as_bytes(), "garageband1021.plist").unwrap();
        assert!(records[0].extra.contains_key("FileCheck"));
    }

    #[test]
    fn test_identity_prefers_package_id() {
        let records = parse(EXAMPLE_CATALOG.as_bytes(), "garageband1021.plist").unwrap();
        assert_eq!(
            records[0].identity(),
            "com.apple.pkg.MAContent10_AssetPack_0001"
        );
    }

    #[test]
    fn test_parse_malformed_bytes() {
        let result = parse(b"this is not a plist {{{", "garageband1021.plist");
        assert!(matches!(result, Err(ParseError::Plist(_))));
    }

    #[test]
    fn test_parse_missing_packages() {
        let empty = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>Other</key><string>x</string></dict></plist>"#;
        let result = parse(empty.as_bytes(), "garageband1021.plist");
        assert!(matches!(result, Err(ParseError::MissingPackages(_))));
    }

    #[test]
    fn test_nested_sub_manifest_flattened() {
        let nested = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>Packages</key>
    <dict>
        <key>Bundle</key>
        <dict>
            <key>Packages</key>
            <dict>
                <key>Inner</key>
                <dict>
                    <key>DownloadName</key>
                    <string>Inner.pkg</string>
                    <key>DownloadSize</key>
                    <integer>10</integer>
                </dict>
            </dict>
        </dict>
    </dict>
</dict>
</plist>"#;
        let records = parse(nested.as_bytes(), "logicpro1040.plist").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].download_name, "Inner.pkg");
        // No PackageID declared, identity falls back to the download name
        assert_eq!(records[0].identity(), "Inner.pkg");
    }
}
