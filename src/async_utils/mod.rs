//! Asynchronous utilities for use with Tokio.

use std::pin::Pin;

use futures::Stream;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Run a blocking function on Tokio's blocking thread pool, so that it doesn't
/// stall the async executor.
///
/// A panic inside `f` is reported as an error instead of taking down the
/// caller, which keeps one bad image from aborting a whole batch.
pub async fn spawn_blocking_task<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked or was cancelled")?
}
