//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates. Schedulers depend on `photo-backup-workspace` with the `desktop`
//! feature to get the fully wired [`core_service`] façade, or enable
//! `pipeline-only` to embed [`core_backup`] behind their own bridges.

#[cfg(feature = "desktop")]
pub use core_service;

#[cfg(feature = "pipeline-only")]
pub use core_backup;
