//! Priority dispatcher.
//!
//! # Role
//! - Fill free execution slots from the pending list, highest priority first.
//! - One tokio task per dispatched job; the task runs `Executor::execute`.
//! - Never retries anything itself: retries live inside the job's own task.
//!
//! Each cycle restarts from the top of the pending list, so a high-priority
//! submission takes the next free slot ahead of older low-priority work.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Completion, Executor};
use crate::config::DispatcherConfig;
use crate::domain::JobId;
use crate::error::JobError;
use crate::ports::JobStore;

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    executor: Arc<Executor>,
    config: DispatcherConfig,

    /// One permit per execution slot.
    permits: Arc<Semaphore>,

    /// Ids handed to a task whose execution has not finished yet.
    in_flight: Arc<Mutex<HashSet<JobId>>>,

    /// Signalled by submissions.
    wake: Arc<Notify>,

    /// Signalled whenever an execution task ends.
    finished: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<Executor>,
        config: DispatcherConfig,
        wake: Arc<Notify>,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            store,
            executor,
            config,
            permits: Arc::new(Semaphore::new(concurrency)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            wake,
            finished: Arc::new(Notify::new()),
        }
    }

    /// Number of executions currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Run one dispatch cycle. Returns the ids handed to execution tasks, in
    /// dispatch order.
    pub async fn dispatch_pending(&self) -> Result<Vec<JobId>, JobError> {
        let page_size = self.config.page_size.max(1);
        let mut dispatched = Vec::new();
        let mut cursor = None;

        'pages: while self.permits.available_permits() > 0 {
            let page = self.store.list_pending(cursor, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.order_key());
            let exhausted = page.len() < page_size;

            for record in page {
                // claim not landed yet
                if self.in_flight.lock().contains(&record.id) {
                    continue;
                }
                let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                    break 'pages;
                };
                self.spawn_execution(record.id, permit);
                dispatched.push(record.id);
            }

            if exhausted {
                break;
            }
        }

        if !dispatched.is_empty() {
            debug!(count = dispatched.len(), "dispatched pending jobs");
        }
        Ok(dispatched)
    }

    fn spawn_execution(&self, id: JobId, permit: OwnedSemaphorePermit) {
        self.in_flight.lock().insert(id);

        let executor = Arc::clone(&self.executor);
        let in_flight = Arc::clone(&self.in_flight);
        let finished = Arc::clone(&self.finished);

        tokio::spawn(async move {
            match executor.execute(id).await {
                Ok(Completion::Completed { attempts }) => {
                    debug!(job_id = %id, attempts, "execution finished");
                }
                Ok(Completion::Cancelled) => debug!(job_id = %id, "execution cancelled"),
                Ok(Completion::NotClaimed) => debug!(job_id = %id, "claimed elsewhere"),
                // Terminal failures are already on the record; log and move on.
                Err(err) => error!(job_id = %id, error = %err, "job ended in failure"),
            }
            in_flight.lock().remove(&id);
            drop(permit);
            finished.notify_one();
        });
    }

    /// Spawn the dispatch loop.
    pub fn spawn(self: &Arc<Self>) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Arc::clone(self);
        let join = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });
        DispatcherHandle { shutdown_tx, join }
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(err) = self.dispatch_pending().await {
                error!(error = %err, "dispatch cycle failed");
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = self.finished.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.drain().await;
        info!("dispatcher stopped");
    }

    /// Wait for every in-flight execution to finish.
    async fn drain(&self) {
        let running = self.in_flight();
        if running > 0 {
            info!(running, "waiting for in-flight jobs");
        }
        let slots = u32::try_from(self.config.concurrency.max(1)).unwrap_or(u32::MAX);
        // The semaphore is never closed, so this only waits.
        let _all = self.permits.acquire_many(slots).await;
    }
}

/// Handle to a running dispatch loop.
///
/// `request_shutdown()` stops new dispatches; `shutdown_and_join()` also
/// waits for in-flight jobs to finish.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop taking new work. In-flight executions are not aborted.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the loop to drain.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "dispatcher task panicked");
        }
    }
}
