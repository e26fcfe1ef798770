/*!
 * Bounded async worker pool with fail-fast error handling
 *
 * Tasks are queued onto a bounded channel and executed by a fixed number of tokio tasks. The first failing task
 * records its error and cancels the pool's token; from then on queuing is a no-op which returns that error, and every
 * task still running observes the cancellation through the token it was handed.
 */

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// Error slot shared between the pool and its workers
#[derive(Clone, Default)]
struct FirstError(Arc<Mutex<Option<Error>>>);

impl FirstError {
    /// Record `err` unless a more meaningful error is already present.
    ///
    /// Cancellation errors caused by an earlier failure never replace that failure.
    fn record(&self, err: Error) {
        let mut slot = self.0.lock();
        match slot.as_ref() {
            None => *slot = Some(err),
            Some(existing) if existing.is_cancelled() && !err.is_cancelled() => *slot = Some(err),
            Some(_) => {}
        }
    }

    fn get(&self) -> Option<Error> {
        self.0.lock().clone()
    }
}

/// Fixed size pool of async workers
pub struct Pool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
    error: FirstError,
}

impl Pool {
    /// Spawn `size` workers (at least one) whose token is a child of `parent`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize, parent: &CancellationToken) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Task>(size);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let token = parent.child_token();
        let error = FirstError::default();

        let workers = (0..size)
            .map(|id| {
                let receiver = receiver.clone();
                let token = token.clone();
                let error = error.clone();
                tokio::spawn(worker(id, receiver, token, error))
            })
            .collect();

        debug!(workers = size, "Started worker pool");

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            token,
            error,
        }
    }

    /// Token cancelled when the pool fails, is stopped, or its parent is cancelled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// First error recorded by a task, if any
    pub fn error(&self) -> Option<Error> {
        self.error.get()
    }

    /// Queue a task, waiting for capacity when every worker is busy.
    ///
    /// Returns the pool's first error without queuing once a task has failed.
    pub async fn queue<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check()?;

        let Some(sender) = self.sender.lock().clone() else {
            return Err(Error::InvalidArgument(
                "task queued on a stopped pool".to_string(),
            ));
        };

        let task: Task = Box::new(move |token| task(token).boxed());

        tokio::select! {
            sent = sender.send(task) => {
                if sent.is_err() {
                    return Err(self.error().unwrap_or(Error::Cancelled));
                }
            }
            _ = self.token.cancelled() => {}
        }

        self.check()
    }

    /// Close the queue and wait for every queued task to finish.
    ///
    /// Returns the first error recorded by any task, or [`Error::Cancelled`] if the parent token was cancelled.
    pub async fn stop(&self) -> Result<()> {
        drop(self.sender.lock().take());

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker task panicked");
                self.error
                    .record(Error::InvalidArgument(format!("worker task failed: {}", err)));
            }
        }

        let result = self.check();
        self.token.cancel();
        result
    }

    fn check(&self) -> Result<()> {
        if let Some(err) = self.error() {
            return Err(err);
        }

        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn worker(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    token: CancellationToken,
    error: FirstError,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                task = receiver.recv() => task,
                _ = token.cancelled() => None,
            }
        };

        let Some(task) = task else {
            break;
        };

        if token.is_cancelled() {
            break;
        }

        if let Err(err) = task(token.clone()).await {
            debug!(worker = id, error = %err, "Task failed, cancelling pool");
            error.record(err);
            token.cancel();
            break;
        }
    }
}
