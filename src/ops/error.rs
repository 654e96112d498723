//! Run-level error taxonomy
//!
//! Fatal errors carry a distinct small exit status so operator tooling
//! can tell configuration mistakes, unreachable sources, privilege
//! problems, and comparison failures apart.

use thiserror::Error;

use crate::core::compare::CompareError;
use crate::core::manifest::ParseError;
use crate::core::patch::PatchError;
use crate::io::image::ImageError;
use crate::io::transport::TransferError;
use crate::ops::deploy::DeployError;
use crate::ops::resolve::ResolveError;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Compare(#[from] CompareError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Patch(#[from] PatchError),

    #[error("{0}")]
    Transfer(#[from] TransferError),

    #[error("{0}")]
    Deploy(#[from] DeployError),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("You must be root to run in deployment mode")]
    PrivilegeRequired,

    #[error("-m/--mandatory or -o/--optional or both are required")]
    NoSelection,

    #[error("--apfs: not allowed without --build-image")]
    ApfsWithoutBuild,

    #[error("--compare-style: not allowed without --compare")]
    StyleWithoutCompare,

    #[error("Disk image conversion failed")]
    ImageConversionFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Exit status for fatal errors, one small integer per class
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::StyleWithoutCompare => 51,
            RunError::Compare(CompareError::DifferentFamilies(..)) => 52,
            RunError::Resolve(e) => e.exit_code(),
            RunError::ApfsWithoutBuild | RunError::Image(ImageError::UnsupportedFilesystem(_)) => {
                59
            }
            RunError::NoSelection => 60,
            RunError::PrivilegeRequired => 66,
            RunError::Compare(CompareError::BadStyle(_))
            | RunError::Image(_)
            | RunError::ImageConversionFailed => 88,
            RunError::Compare(CompareError::NoPackages(_)) => 99,
            _ => 1,
        }
    }
}
