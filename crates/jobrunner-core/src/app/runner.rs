//! Runner - wiring of store, registry, executor, dispatcher and service.

use std::sync::Arc;

use tokio::sync::Notify;

use super::JobService;
use crate::config::RunnerConfig;
use crate::engine::{Dispatcher, DispatcherHandle, Executor};
use crate::ports::JobStore;
use crate::registry::Registry;

/// One job runner.
///
/// ```ignore
/// let runner = Runner::new(registry, Arc::new(InMemoryJobStore::new()), RunnerConfig::default());
/// let handle = runner.start();
/// let id = runner.service().submit(runner.service().request("report")).await?;
/// handle.shutdown_and_join().await;
/// ```
pub struct Runner {
    service: Arc<JobService>,
    executor: Arc<Executor>,
    dispatcher: Arc<Dispatcher>,
}

impl Runner {
    pub fn new(registry: Registry, store: Arc<dyn JobStore>, config: RunnerConfig) -> Self {
        let registry = Arc::new(registry);
        let wake = Arc::new(Notify::new());

        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.retry.policy(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            config.dispatcher,
            Arc::clone(&wake),
        ));
        let service = Arc::new(JobService::new(store, registry, config.defaults, wake));

        Self {
            service,
            executor,
            dispatcher,
        }
    }

    pub fn service(&self) -> &Arc<JobService> {
        &self.service
    }

    /// Direct access for callers that want to await one execution themselves.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Spawn the dispatch loop.
    pub fn start(&self) -> DispatcherHandle {
        self.dispatcher.spawn()
    }
}
