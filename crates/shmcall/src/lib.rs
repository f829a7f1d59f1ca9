#![doc = include_str!("../README.md")]
#![forbid(unsafe_op_in_unsafe_fn)]

pub mod bootstrap;
pub mod caller;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod registry;
pub mod transport;

pub use bootstrap::{WorkerHandle, spawn_worker};
pub use caller::{Caller, PendingCaller, ReadyError};
pub use config::{
    ChannelConfig, FatalReporter, HandlerFailurePolicy, WorkerConfig, abort_on_fatal,
};
pub use context::{AlreadyRegistered, ContextId, ContextTable};
pub use dispatch::{Worker, WorkerExit, WorkerState};
pub use error::{
    BootstrapError, BoxError, CallError, ConfigError, LayoutError, RegistryError, WorkerError,
};
pub use layout::{Channel, DEFAULT_CHANNEL_SIZE, DEFAULT_PAYLOAD_CAPACITY};
pub use registry::{Handler, HandlerFuture, HandlerRegistry, HandlerRegistryBuilder};
pub use transport::SharedMemoryTransport;

pub use shmcall_codec::{CodecError, Encoding, Request, Response, Value};
pub use shmcall_primitives::{CALLER_TURN, HeapRegion, Region, WORKER_TURN};
