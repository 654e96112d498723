//! Catalog comparison
//!
//! Renders two catalogs' package sets as display lines and diffs them.
//! Only catalogs from the same application family are comparable.

use std::str::FromStr;

use thiserror::Error;

use crate::core::catalog;
use crate::core::manifest::AttributeRecord;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("Cannot compare catalogs for different applications: {0} vs {1}")]
    DifferentFamilies(String, String),

    #[error("Invalid diff style '{0}', choose from 'unified' or 'context'")]
    BadStyle(String),

    #[error("Could not find packages in {0}")]
    NoPackages(String),
}

/// Diff rendering style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffStyle {
    #[default]
    Unified,
    Context,
}

impl FromStr for DiffStyle {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(DiffStyle::Unified),
            "context" => Ok(DiffStyle::Context),
            other => Err(CompareError::BadStyle(other.to_string())),
        }
    }
}

/// Format bytes as human readable
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Reject comparisons across application families before any parsing work
pub fn check_same_family(a: &str, b: &str) -> Result<(), CompareError> {
    let fam_a = catalog::family_of(a);
    let fam_b = catalog::family_of(b);
    if fam_a.is_none() || fam_a != fam_b {
        return Err(CompareError::DifferentFamilies(a.to_string(), b.to_string()));
    }
    Ok(())
}

/// One display line per package: unsequenced packages sorted by download
/// name first, then sequenced packages in sequence order.
fn render(records: &[AttributeRecord]) -> Vec<String> {
    let mut unsequenced: Vec<&AttributeRecord> = records
        .iter()
        .filter(|r| r.sequence_number.is_none())
        .collect();
    unsequenced.sort_by(|a, b| a.download_name.cmp(&b.download_name));

    let mut sequenced: Vec<&AttributeRecord> = records
        .iter()
        .filter(|r| r.sequence_number.is_some())
        .collect();
    sequenced.sort_by_key(|r| r.sequence_number);

    unsequenced
        .into_iter()
        .chain(sequenced)
        .map(|r| {
            format!(
                "{name} ({class}, {size})",
                name = crate::filename_from_url(&r.download_name),
                class = if r.mandatory { "Mandatory" } else { "Optional" },
                size = format_size(r.download_size.unwrap_or(0)),
            )
        })
        .collect()
}

/// Diff two catalogs' records. Returns the rendered diff lines, header
/// included; an empty change set yields just the headers.
pub fn diff(
    records_a: &[AttributeRecord],
    records_b: &[AttributeRecord],
    name_a: &str,
    name_b: &str,
    style: DiffStyle,
) -> Result<Vec<String>, CompareError> {
    check_same_family(name_a, name_b)?;

    if records_a.is_empty() {
        return Err(CompareError::NoPackages(name_a.to_string()));
    }
    if records_b.is_empty() {
        return Err(CompareError::NoPackages(name_b.to_string()));
    }

    let lines_a = render(records_a);
    let lines_b = render(records_b);

    let mut out = match style {
        DiffStyle::Unified => vec![format!("--- {name_a}"), format!("+++ {name_b}")],
        DiffStyle::Context => vec![format!("*** {name_a}"), format!("--- {name_b}")],
    };

    for (removed, added) in changes(&lines_a, &lines_b) {
        for line in removed {
            out.push(format!("- {line}"));
        }
        for line in added {
            out.push(format!("+ {line}"));
        }
    }

    Ok(out)
}

/// LCS walk over the two line lists, yielding grouped (removed, added)
/// change runs in order.
fn changes<'a>(a: &'a [String], b: &'a [String]) -> Vec<(Vec<&'a str>, Vec<&'a str>)> {
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut runs = Vec::new();
    let (mut i, mut j) = (0, 0);
    let mut removed = Vec::new();
    let mut added = Vec::new();

    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            if !removed.is_empty() || !added.is_empty() {
                runs.push((std::mem::take(&mut removed), std::mem::take(&mut added)));
            }
            i += 1;
            j += 1;
        } else if j < m && (i == n || lcs[i][j + 1] >= lcs[i + 1][j]) {
            added.push(b[j].as_str());
            j += 1;
        } else {
            removed.push(a[i].as_str());
            i += 1;
        }
    }
    if !removed.is_empty() || !added.is_empty() {
        runs.push((removed, added));
    }

    runs
}
