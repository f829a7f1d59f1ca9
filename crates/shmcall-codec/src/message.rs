use serde::{Deserialize, Serialize};

use crate::Value;

/// Kinds starting with this prefix belong to the transport itself and cannot
/// be registered as handlers.
pub const RESERVED_KIND_PREFIX: char = '$';

/// Asks the worker to reply once more and leave its dispatch loop.
pub const SHUTDOWN_KIND: &str = "$shutdown";

/// One call: which handler to run and what to pass it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub kind: String,
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            args,
        }
    }

    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_KIND, Vec::new())
    }

    pub fn is_shutdown(&self) -> bool {
        self.kind == SHUTDOWN_KIND
    }

    pub fn is_reserved(&self) -> bool {
        self.kind.starts_with(RESERVED_KIND_PREFIX)
    }
}

/// What the worker writes back for the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// The handler's result.
    Return(Value),
    /// The handler failed and the worker is configured to hand the failure
    /// back instead of escalating it.
    HandlerFailed { kind: String, message: String },
    /// The worker hit an unrecoverable error. Written just before the final
    /// unblocking signal; no further turns follow.
    WorkerFailed { message: String },
}
