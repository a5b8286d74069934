//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (archive source,
//! destination store, cursor persistence, notifiers) and a validated
//! [`BackupConfig`](core_runtime::BackupConfig) into a [`BackupService`].
//! Desktop and CI deployments enable the `desktop` feature, which builds the
//! whole stack from environment variables via [`bootstrap_desktop`].

pub mod error;
pub mod notify;
pub mod service;

#[cfg(feature = "desktop")]
pub mod desktop;

pub use error::{CoreError, Result};
pub use notify::{MarkdownSummaryNotifier, Notifier, RunSummary, TracingNotifier};
pub use service::{BackupService, RunRequest};

#[cfg(feature = "desktop")]
pub use desktop::{bootstrap_desktop, init_desktop_logging};
