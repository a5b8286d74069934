//! Async filesystem access for archive staging, cursor files and summaries.

pub use tokio::fs::{create_dir_all, metadata, read, read_dir, remove_file, rename, File, OpenOptions};
