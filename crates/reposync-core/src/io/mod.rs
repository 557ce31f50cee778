//! IO modules - side effects (network)

pub mod download;
