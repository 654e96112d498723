//! Core modules - pure, stateless logic

pub mod catalog;
pub mod compare;
pub mod manifest;
pub mod package;
pub mod patch;
pub mod registry;
