//! Executor access for code that may run outside an async context, such as
//! a tracing layer fired from a synchronous caller.

pub use tokio::runtime::{Builder, Handle};

/// Drive `future` to completion on a throwaway current-thread runtime.
pub fn block_on<F>(future: F) -> std::io::Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
