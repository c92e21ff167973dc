//! Fan-out of independent per-unit operations.
//!
//! Tasks run concurrently on the calling task and may borrow from the caller.
//! Both policies join every task before returning.
use crate::{errors::ErrorList, Result};
use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One unit of work, tagged with the key its failure is reported under.
pub struct Task<'a> {
    pub key: String,
    run: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'a, Result<()>> + Send + 'a>,
}

impl<'a> Task<'a> {
    pub fn new(
        key: impl Into<String>,
        run: impl FnOnce(CancellationToken) -> BoxFuture<'a, Result<()>> + Send + 'a,
    ) -> Self {
        Self {
            key: key.into(),
            run: Box::new(run),
        }
    }
}

/// Run every task to completion and report all failures, tagged by key.
pub async fn run_best_effort(tasks: Vec<Task<'_>>, cancel: &CancellationToken) -> Result<()> {
    let mut running: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|task| {
            let fut = (task.run)(cancel.clone());
            let key = task.key;
            async move { (key, fut.await) }
        })
        .collect();

    let mut errors = ErrorList::default();
    while let Some((key, res)) = running.next().await {
        match res {
            Ok(()) => debug!("{} finished", key),
            Err(err) => {
                warn!("{} failed: {}", key, err);
                errors.push(key, err);
            }
        }
    }
    errors.into_result()
}

/// Run tasks until the first one fails, then cancel the rest and return that error.
///
/// Cancelled tasks are still driven until they return, so nothing outlives the call.
pub async fn run_exit_on_first_error(tasks: Vec<Task<'_>>, cancel: &CancellationToken) -> Result<()> {
    let child = cancel.child_token();
    let mut running: FuturesUnordered<_> = tasks
        .into_iter()
        .map(|task| {
            let fut = (task.run)(child.clone());
            let key = task.key;
            async move { (key, fut.await) }
        })
        .collect();

    let mut first = None;
    while let Some((key, res)) = running.next().await {
        match res {
            Ok(()) => debug!("{} finished", key),
            Err(err) if first.is_none() => {
                warn!("{} failed, cancelling the remaining tasks: {}", key, err);
                child.cancel();
                first = Some(err);
            }
            Err(err) => debug!("{} stopped after cancellation: {}", key, err),
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
