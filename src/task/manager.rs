//! Dispatch loop feeding a task set's enabled tasks to a pool of workers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::set::TaskSet;

struct Dispatcher {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Runs the tasks of one [`TaskSet`] on at most `workers` concurrent workers.
///
/// The manager does not wait for a task to complete before pulling the next
/// one; ordering between tasks is entirely the task set's business.
pub struct TaskManager {
    task_set: TaskSet,
    workers: usize,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl TaskManager {
    pub fn new(workers: usize, task_set: TaskSet) -> Self {
        Self {
            task_set,
            workers: workers.max(1),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn task_set(&self) -> &TaskSet {
        &self.task_set
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Spawns the dispatch loop. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip(self), fields(scope = %self.task_set.scope()))]
    pub fn start(&self) {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            debug!("task manager already running");
            return;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(dispatch(
            self.task_set.clone(),
            self.workers,
            shutdown.clone(),
        ));
        info!(workers = self.workers, "task manager started");
        *dispatcher = Some(Dispatcher { handle, shutdown });
    }

    /// Stops pulling tasks, clears the task set, and waits for tasks already
    /// handed to a worker to finish.
    ///
    /// Safe to call repeatedly, and on a manager that was never started.
    #[tracing::instrument(skip(self), fields(scope = %self.task_set.scope()))]
    pub async fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        let Some(Dispatcher { handle, shutdown }) = dispatcher else {
            self.task_set.clear();
            return;
        };
        shutdown.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "task manager dispatch loop failed");
            self.task_set.clear();
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.shutdown.cancel();
        }
    }
}

async fn dispatch(task_set: TaskSet, workers: usize, shutdown: CancellationToken) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    loop {
        while let Some(result) = running.try_join_next() {
            reap(result);
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        debug!(scope = %task_set.scope(), "waiting for next task");
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = task_set.take() => next,
        };

        debug!(scope = %task_set.scope(), command = ?next.command(), "submitting task for execution");
        running.spawn(async move {
            next.run().await;
            drop(permit);
        });
    }

    info!(scope = %task_set.scope(), in_flight = running.len(), "shutting down task manager");
    let discarded = task_set.clear();
    if discarded > 0 {
        debug!(scope = %task_set.scope(), discarded, "aborted outstanding tasks");
    }
    while let Some(result) = running.join_next().await {
        reap(result);
    }
}

fn reap(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "task panicked");
        } else {
            warn!(error = %e, "task cancelled");
        }
    }
}
