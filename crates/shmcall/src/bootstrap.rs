//! Wiring a channel between the current thread and a new worker thread.

use std::fmt;
use std::thread::{self, JoinHandle};

use tracing::Instrument;

use crate::caller::PendingCaller;
use crate::config::{ChannelConfig, WorkerConfig};
use crate::dispatch::{Worker, WorkerExit, panic_message};
use crate::error::{BootstrapError, BoxError, WorkerError};
use crate::layout::Channel;
use crate::registry::HandlerRegistryBuilder;
use crate::transport::SharedMemoryTransport;

/// Allocate a channel and start a worker thread serving it.
///
/// `init` runs on the worker thread, inside its runtime, before the ready
/// signal. Handlers it registers may hold `Rc`s and other thread-bound
/// state. The returned [`PendingCaller`] must observe readiness before it
/// can issue calls.
pub fn spawn_worker<F>(
    channel_config: &ChannelConfig,
    worker_config: WorkerConfig,
    init: F,
) -> Result<(PendingCaller, WorkerHandle), BootstrapError>
where
    F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError> + Send + 'static,
{
    let channel = Channel::new(channel_config)?;
    tracing::debug!(
        size = channel.size(),
        encoding = %channel.encoding(),
        "channel allocated"
    );
    let transport = SharedMemoryTransport::new(channel);
    let pending = PendingCaller::new(transport.clone());

    let thread = thread::Builder::new()
        .name(worker_config.thread_name.clone())
        .spawn(move || run_worker(transport, worker_config, init))
        .map_err(BootstrapError::Spawn)?;

    Ok((pending, WorkerHandle { thread }))
}

/// Worker thread body: a single-threaded runtime with a `LocalSet`, so
/// handlers and anything they spawn stay on this thread.
fn run_worker<F>(
    transport: SharedMemoryTransport,
    config: WorkerConfig,
    init: F,
) -> Result<WorkerExit, WorkerError>
where
    F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError>,
{
    let worker = Worker::new(transport, config);
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return Err(worker.fail_to_start(WorkerError::Runtime(e.to_string()))),
    };
    let local = tokio::task::LocalSet::new();
    let span = tracing::info_span!("shmcall_worker");
    local.block_on(&rt, worker.run(init).instrument(span))
}

/// Owns the worker thread.
pub struct WorkerHandle {
    thread: JoinHandle<Result<WorkerExit, WorkerError>>,
}

impl WorkerHandle {
    /// Wait for the worker thread to finish.
    ///
    /// Only returns once the worker stopped (after `$shutdown`) or failed and
    /// its fatal reporter returned. Shut the [`Caller`](crate::Caller) down or
    /// drop it first: joining while it is still alive blocks forever.
    pub fn join(self) -> Result<WorkerExit, BootstrapError> {
        match self.thread.join() {
            Ok(Ok(exit)) => Ok(exit),
            Ok(Err(e)) => Err(BootstrapError::Worker(e)),
            Err(payload) => Err(BootstrapError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread.thread().name()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("thread", &self.thread_name())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use shmcall_codec::Value;

    use super::*;
    use crate::error::LayoutError;

    #[test]
    fn invalid_channel_is_rejected_before_spawning() {
        let err = spawn_worker(
            &ChannelConfig::default().with_size(10),
            WorkerConfig::default(),
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, BootstrapError::Layout(LayoutError::TooSmall { .. })));
    }

    #[test]
    fn worker_thread_is_named() {
        let (pending, worker) = spawn_worker(
            &ChannelConfig::default(),
            WorkerConfig::default().with_thread_name("loader-worker"),
            |handlers| {
                handlers.register("name", |_args: Vec<Value>| async {
                    Ok(Value::from(thread::current().name().map(str::to_owned)))
                })?;
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(worker.thread_name(), Some("loader-worker"));

        let mut caller = pending.wait_ready().unwrap();
        assert_eq!(caller.call("name", vec![]).unwrap(), Value::from("loader-worker"));
        caller.shutdown().unwrap();
        assert_eq!(worker.join().unwrap().handled, 1);
    }
}
