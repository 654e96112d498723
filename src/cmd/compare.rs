//! Compare command

use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use loopfetch::core::compare::{self, DiffStyle};
use loopfetch::core::manifest::{self, AttributeRecord};
use loopfetch::core::{catalog, patch::PatchError};
use loopfetch::io::transport::Transport;
use loopfetch::ops::RunError;

/// Diff two catalogs' package sets and print the result. Catalogs are
/// read from local files when the argument names one, fetched from the
/// vendor feed otherwise.
pub async fn compare(a: &str, b: &str, style: Option<&str>) -> Result<(), RunError> {
    // Oldest first, so additions read as additions
    let (a, b) = if a <= b { (a, b) } else { (b, a) };

    compare::check_same_family(a, b)?;

    let style = match style {
        Some(s) => DiffStyle::from_str(s)?,
        None => DiffStyle::default(),
    };

    let transport = Transport::new(false)?;
    let records_a = load_records(&transport, a).await?;
    let records_b = load_records(&transport, b).await?;

    let name_a = format!("{}.plist", catalog::identity_of(a));
    let name_b = format!("{}.plist", catalog::identity_of(b));

    for line in compare::diff(&records_a, &records_b, &name_a, &name_b, style)? {
        println!("{line}");
    }

    Ok(())
}

async fn load_records(
    transport: &Transport,
    source: &str,
) -> Result<Vec<AttributeRecord>, RunError> {
    let bytes = if Path::new(source).is_file() {
        debug!(source, "reading local catalog");
        tokio::fs::read(source).await?
    } else {
        let canonical = catalog::resolve_source(source)
            .ok_or_else(|| PatchError::UnknownSource(source.to_string()))?;
        let url = catalog::feed_url(&canonical);
        debug!(source, url, "fetching catalog");
        let dest = std::env::temp_dir().join("loopfetch-compare").join(&canonical);
        transport.fetch(&url, &dest, None).await?;
        tokio::fs::read(&dest).await?
    };

    Ok(manifest::parse(&bytes, source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopfetch::core::compare::CompareError;

    #[test]
    fn test_cross_family_rejected_before_any_fetch() {
        let err = futures::executor::block_on(compare(
            "garageband1021.plist",
            "logicpro1070.plist",
            None,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            RunError::Compare(CompareError::DifferentFamilies(..))
        ));
        assert_eq!(err.exit_code(), 52);
    }

    #[test]
    fn test_bad_style_rejected() {
        let err = futures::executor::block_on(compare(
            "garageband1021.plist",
            "garageband1022.plist",
            Some("html"),
        ))
        .unwrap_err();
        assert!(matches!(err, RunError::Compare(CompareError::BadStyle(_))));
        assert_eq!(err.exit_code(), 88);
    }
}
