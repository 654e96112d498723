//! IO modules - side effects (network, disk images)

pub mod image;
pub mod transport;
