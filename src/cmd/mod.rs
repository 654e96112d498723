//! Command modules - one file per CLI command

pub mod compare;
pub mod run;
