//! Sync bridge used by the Postgres stores.
//!
//! The store traits are synchronous; the sqlx pool is async. Calls are driven
//! on the ambient tokio runtime through `block_in_place`, which only a
//! multi-threaded runtime supports.

use std::future::Future;

use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockingError {
    #[error("Postgres stores must be used inside a tokio runtime")]
    NoRuntime,

    #[error("Postgres stores need a multi-threaded tokio runtime, found a current-thread one")]
    CurrentThread,
}

pub(crate) fn block_on<F: Future>(fut: F) -> Result<F::Output, BlockingError> {
    let handle = Handle::try_current().map_err(|_| BlockingError::NoRuntime)?;
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return Err(BlockingError::CurrentThread);
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
}
