//! A3S Mirror CLI - multi-arch image mirroring between registries and
//! local archives.

pub mod commands;
pub mod list;
pub mod output;
