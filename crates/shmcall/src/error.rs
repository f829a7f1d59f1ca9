use std::fmt;

use shmcall_codec::{CodecError, UnknownEncoding};
use shmcall_primitives::PayloadTooLarge;

/// Error type handlers fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unrecoverable worker-side failure.
///
/// None of these are retried. Each one takes the worker to its `Failed`
/// state, releases the caller, and is handed to the fatal reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Payload bytes did not parse as a request.
    Decode(CodecError),
    /// The request named a kind with no registered handler.
    UnknownKind(String),
    /// The handler's async work failed (or panicked).
    Handler { kind: String, message: String },
    /// The response could not be serialized.
    Encode(CodecError),
    /// The encoded response did not fit in the payload region.
    Overflow(PayloadTooLarge),
    /// Handler registration failed before the worker announced readiness.
    Init(String),
    /// The worker's own runtime could not be started.
    Runtime(String),
}

impl WorkerError {
    /// Stable name of the failure class, for diagnostics.
    pub fn class(&self) -> &'static str {
        match self {
            WorkerError::Decode(_) => "DecodeError",
            WorkerError::UnknownKind(_) => "UnknownKind",
            WorkerError::Handler { .. } => "HandlerFailure",
            WorkerError::Encode(_) => "EncodeError",
            WorkerError::Overflow(_) => "OverflowError",
            WorkerError::Init(_) => "InitError",
            WorkerError::Runtime(_) => "RuntimeError",
        }
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Decode(e) => write!(f, "failed to decode request: {e}"),
            WorkerError::UnknownKind(kind) => write!(f, "no handler registered for kind {kind:?}"),
            WorkerError::Handler { kind, message } => {
                write!(f, "handler for {kind:?} failed: {message}")
            }
            WorkerError::Encode(e) => write!(f, "failed to encode response: {e}"),
            WorkerError::Overflow(e) => write!(f, "response overflow: {e}"),
            WorkerError::Init(message) => write!(f, "worker initialization failed: {message}"),
            WorkerError::Runtime(message) => write!(f, "worker runtime failed to start: {message}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Decode(e) | WorkerError::Encode(e) => Some(e),
            WorkerError::Overflow(e) => Some(e),
            _ => None,
        }
    }
}

/// A call made through [`Caller`](crate::Caller) did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The request could not be serialized. Nothing was sent.
    Encode(CodecError),
    /// The encoded request did not fit in the payload region. Nothing was
    /// sent and the caller still holds the turn.
    Overflow(PayloadTooLarge),
    /// The worker's reply could not be parsed.
    Decode(CodecError),
    /// The handler failed and the worker handed the failure back.
    Handler { kind: String, message: String },
    /// The worker failed fatally; no further calls can succeed.
    WorkerFailed(String),
    /// A previous call observed a worker failure.
    Poisoned,
    /// Kinds starting with `$` are reserved for the transport.
    ReservedKind(String),
    /// No handler can be registered under an empty kind.
    EmptyKind,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Encode(e) => write!(f, "failed to encode request: {e}"),
            CallError::Overflow(e) => write!(f, "request overflow: {e}"),
            CallError::Decode(e) => write!(f, "failed to decode response: {e}"),
            CallError::Handler { kind, message } => {
                write!(f, "handler for {kind:?} failed: {message}")
            }
            CallError::WorkerFailed(message) => write!(f, "worker failed: {message}"),
            CallError::Poisoned => write!(f, "worker already failed; channel is unusable"),
            CallError::ReservedKind(kind) => write!(f, "kind {kind:?} is reserved"),
            CallError::EmptyKind => write!(f, "kind must not be empty"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Encode(e) | CallError::Decode(e) => Some(e),
            CallError::Overflow(e) => Some(e),
            _ => None,
        }
    }
}

/// Handler registration failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    EmptyKind,
    ReservedKind(String),
    DuplicateKind(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyKind => write!(f, "handler kind cannot be empty"),
            RegistryError::ReservedKind(kind) => {
                write!(f, "handler kind {kind:?} uses the reserved '$' prefix")
            }
            RegistryError::DuplicateKind(kind) => {
                write!(f, "a handler is already registered for kind {kind:?}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// The channel region cannot hold the agreed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    TooSmall { size: usize, min: usize },
    Unaligned { size: usize },
    Misaligned { addr: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::TooSmall { size, min } => {
                write!(f, "channel size {size} is below the minimum of {min} bytes")
            }
            LayoutError::Unaligned { size } => {
                write!(f, "channel size {size} is not a multiple of 4")
            }
            LayoutError::Misaligned { addr } => {
                write!(f, "channel region at {addr:#x} is not 4-byte aligned")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// Configuration could not be read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidSize { var: &'static str, value: String },
    Encoding(UnknownEncoding),
    Layout(LayoutError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidSize { var, value } => {
                write!(f, "{var}={value:?} is not a byte count")
            }
            ConfigError::Encoding(e) => write!(f, "{e}"),
            ConfigError::Layout(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Starting or joining the worker thread failed.
#[derive(Debug)]
pub enum BootstrapError {
    Layout(LayoutError),
    Spawn(std::io::Error),
    Worker(WorkerError),
    Panicked(String),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::Layout(e) => write!(f, "invalid channel layout: {e}"),
            BootstrapError::Spawn(e) => write!(f, "failed to spawn worker thread: {e}"),
            BootstrapError::Worker(e) => write!(f, "{e}"),
            BootstrapError::Panicked(message) => write!(f, "worker thread panicked: {message}"),
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::Layout(e) => Some(e),
            BootstrapError::Spawn(e) => Some(e),
            BootstrapError::Worker(e) => Some(e),
            BootstrapError::Panicked(_) => None,
        }
    }
}

impl From<LayoutError> for BootstrapError {
    fn from(e: LayoutError) -> Self {
        BootstrapError::Layout(e)
    }
}
