//! Command modules - one file per CLI command

pub mod completions;
pub mod installed;
pub mod repos;
pub mod status;
pub mod update;
