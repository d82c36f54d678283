//! Worker pool
//!
//! Each worker pulls keys from a [`WorkQueue`] and runs one reconciliation
//! per key in its own task. A panicking sync is caught at the join boundary,
//! logged, and retried like any other retryable error; sibling workers keep
//! running.

use crate::client::ReleaseKey;
use crate::queue::WorkQueue;
use async_trait::async_trait;
use rvc_core::ControllerError;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One reconciliation loop
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Bring the release at `key` to its desired state
    ///
    /// # Errors
    /// Terminal errors are dropped; other errors are retried with backoff.
    async fn reconcile(&self, key: &ReleaseKey) -> Result<(), ControllerError>;
}

/// Run `workers` workers until `cancel` fires
///
/// The queue is shut down on cancellation; in-flight syncs finish first.
pub async fn run_workers(
    reconciler: Arc<dyn Reconciler>,
    queue: WorkQueue<ReleaseKey>,
    workers: usize,
    cancel: CancellationToken,
) {
    let watcher = {
        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            queue.shutdown();
        })
    };

    tracing::info!(reconciler = reconciler.name(), workers, "starting workers");
    let handles: Vec<_> = (0..workers.max(1))
        .map(|id| {
            let reconciler = Arc::clone(&reconciler);
            let queue = queue.clone();
            tokio::spawn(async move { worker_loop(id, reconciler, queue).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        if let Err(err) = result {
            tracing::error!(error = %err, "worker exited abnormally");
        }
    }
    watcher.abort();
    tracing::info!(reconciler = reconciler.name(), "workers stopped");
}

async fn worker_loop(id: usize, reconciler: Arc<dyn Reconciler>, queue: WorkQueue<ReleaseKey>) {
    while let Some(key) = queue.get().await {
        let result = process(&reconciler, &key).await;
        handle_result(reconciler.name(), id, &queue, &key, result);
        queue.done(&key);
    }
}

/// Run one sync in its own task so a panic stays contained
async fn process(
    reconciler: &Arc<dyn Reconciler>,
    key: &ReleaseKey,
) -> Result<(), ControllerError> {
    let task = {
        let reconciler = Arc::clone(reconciler);
        let key = key.clone();
        tokio::spawn(async move { reconciler.reconcile(&key).await })
    };
    match task.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            Err(ControllerError::Panicked(panic_message(&*err.into_panic())))
        }
        Err(err) => Err(ControllerError::Panicked(err.to_string())),
    }
}

fn handle_result(
    name: &str,
    worker: usize,
    queue: &WorkQueue<ReleaseKey>,
    key: &ReleaseKey,
    result: Result<(), ControllerError>,
) {
    match result {
        Ok(()) => queue.forget(key),
        Err(err) if err.is_terminal() => {
            tracing::warn!(
                reconciler = name,
                worker,
                release = %key,
                error = %err,
                "terminal error, not retrying"
            );
            queue.forget(key);
        }
        Err(err) => {
            if matches!(err, ControllerError::Panicked(_)) {
                tracing::error!(
                    reconciler = name,
                    worker,
                    release = %key,
                    error = %err,
                    "sync panicked"
                );
            } else {
                tracing::debug!(
                    reconciler = name,
                    worker,
                    release = %key,
                    error = %err,
                    retries = queue.num_requeues(key),
                    "sync failed, requeueing"
                );
            }
            queue.add_rate_limited(key.clone());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
