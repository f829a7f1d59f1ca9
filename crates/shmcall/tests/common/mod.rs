#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use shmcall::{
    BoxError, ChannelConfig, HandlerFailurePolicy, HandlerRegistryBuilder, PendingCaller,
    WorkerConfig, WorkerError, WorkerHandle, spawn_worker,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collects whatever reaches the fatal reporter instead of aborting.
#[derive(Clone, Default)]
pub struct FatalLog {
    errors: Arc<Mutex<Vec<WorkerError>>>,
}

impl FatalLog {
    pub fn worker_config(&self, policy: HandlerFailurePolicy) -> WorkerConfig {
        let errors = self.errors.clone();
        WorkerConfig::default()
            .with_failure_policy(policy)
            .with_fatal_reporter(move |err| errors.lock().push(err.clone()))
    }

    pub fn errors(&self) -> Vec<WorkerError> {
        self.errors.lock().clone()
    }
}

/// Start a worker with the default channel, escalating handler failures into
/// `fatal` instead of aborting.
pub fn start<F>(fatal: &FatalLog, init: F) -> (PendingCaller, WorkerHandle)
where
    F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError> + Send + 'static,
{
    start_with(&ChannelConfig::default(), fatal, HandlerFailurePolicy::Escalate, init)
}

pub fn start_with<F>(
    channel: &ChannelConfig,
    fatal: &FatalLog,
    policy: HandlerFailurePolicy,
    init: F,
) -> (PendingCaller, WorkerHandle)
where
    F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError> + Send + 'static,
{
    init_tracing();
    spawn_worker(channel, fatal.worker_config(policy), init).unwrap()
}
