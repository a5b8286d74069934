//! Async write helpers used when staging downloads and appending summaries.

pub use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
