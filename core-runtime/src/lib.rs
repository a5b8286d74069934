//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the photo backup core:
//! - Logging and tracing infrastructure
//! - Configuration management (`BackupConfig` builder and environment loader)
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the pipeline and service
//! crates depend on. It establishes the logging conventions and the single
//! validated configuration value every run is driven by.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BackupConfig, BackupConfigBuilder, FallbackDatePolicy};
pub use error::{Error, Result};
