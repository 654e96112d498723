//! Known-sources table
//!
//! The fixed set of application families and the vendor catalogs published
//! for each. Catalog identities embed a zero-padded version, so a
//! descending lexicographic sort within a family orders newest-first.

use std::fmt;
use std::str::FromStr;

use crate::ORIGIN_URL;

/// Application family an audio-content catalog belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppFamily {
    GarageBand,
    LogicPro,
    MainStage,
}

impl AppFamily {
    /// All families, in the fixed order manifests are processed in
    pub const ALL: [AppFamily; 3] = [
        AppFamily::GarageBand,
        AppFamily::LogicPro,
        AppFamily::MainStage,
    ];

    /// Catalog identity prefix for this family
    pub fn prefix(self) -> &'static str {
        match self {
            AppFamily::GarageBand => "garageband",
            AppFamily::LogicPro => "logicpro",
            AppFamily::MainStage => "mainstage",
        }
    }

    /// Known catalog identities for this family, oldest first
    pub fn manifests(self) -> &'static [&'static str] {
        match self {
            AppFamily::GarageBand => &[
                "garageband1010",
                "garageband1011",
                "garageband1012",
                "garageband1013",
                "garageband1015",
                "garageband1016",
                "garageband1020",
                "garageband1021",
                "garageband1022",
                "garageband1023",
            ],
            AppFamily::LogicPro => &[
                "logicpro1040",
                "logicpro1050",
                "logicpro1051",
                "logicpro1060",
                "logicpro1061",
                "logicpro1070",
            ],
            AppFamily::MainStage => &[
                "mainstage340",
                "mainstage350",
                "mainstage351",
                "mainstage360",
            ],
        }
    }

    /// Newest known catalog identity for this family
    pub fn latest(self) -> &'static str {
        self.manifests()
            .last()
            .expect("every family has at least one catalog")
    }
}

impl fmt::Display for AppFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for AppFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "garageband" => Ok(AppFamily::GarageBand),
            "logicpro" => Ok(AppFamily::LogicPro),
            "mainstage" => Ok(AppFamily::MainStage),
            other => Err(format!("unknown application family '{other}'")),
        }
    }
}

/// Strip any leading path/URL components and a trailing `.plist`,
/// returning the bare catalog identity.
pub fn identity_of(source: &str) -> &str {
    let base = source.rsplit(['/', '\\']).next().unwrap_or(source);
    base.strip_suffix(".plist").unwrap_or(base)
}

/// The family a catalog identity belongs to, if its prefix is recognized
pub fn family_of(source: &str) -> Option<AppFamily> {
    let identity = identity_of(source);
    AppFamily::ALL
        .into_iter()
        .find(|f| identity.starts_with(f.prefix()))
}

/// Whether the source names a catalog in the known-sources table
pub fn is_known(source: &str) -> bool {
    let identity = identity_of(source);
    family_of(source).is_some_and(|f| f.manifests().contains(&identity))
}

/// Resolve a source (catalog identity, feed filename, path, or bare family
/// name) to its canonical `<identity>.plist` filename. A bare family name
/// maps to that family's newest catalog.
pub fn resolve_source(source: &str) -> Option<String> {
    if let Ok(family) = AppFamily::from_str(source) {
        return Some(format!("{}.plist", family.latest()));
    }
    if is_known(source) {
        return Some(format!("{}.plist", identity_of(source)));
    }
    None
}

/// Feed URL for a catalog filename at the vendor origin
pub fn feed_url(manifest: &str) -> String {
    format!("{ORIGIN_URL}/{manifest}")
}

/// Order manifests for processing: grouped by family in fixed family
/// order, newest-version-first within each family. The first manifest to
/// declare a package identity wins, so newest must come first to keep
/// stale duplicates from shadowing corrected metadata.
pub fn order_manifests(manifests: &[String]) -> Vec<String> {
    let mut ordered = Vec::with_capacity(manifests.len());
    for family in AppFamily::ALL {
        let mut group: Vec<&String> = manifests
            .iter()
            .filter(|m| family_of(m) == Some(family))
            .collect();
        group.sort_unstable_by(|a, b| b.cmp(a));
        ordered.extend(group.into_iter().cloned());
    }
    ordered
}
