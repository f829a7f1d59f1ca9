//! The blocking side of a channel.

use std::fmt;
use std::time::Duration;

use shmcall_codec::{RESERVED_KIND_PREFIX, Request, Response, SHUTDOWN_KIND, Value};

use crate::error::CallError;
use crate::transport::SharedMemoryTransport;

/// A caller that has not yet seen the worker's ready signal.
///
/// The only way to get a [`Caller`] is to consume this handle through
/// [`wait_ready`](Self::wait_ready), so no request can be sent before the
/// worker is ready and the ready signal is observed once.
#[derive(Debug)]
pub struct PendingCaller {
    transport: SharedMemoryTransport,
}

/// [`PendingCaller::wait_ready_timeout`] did not produce a caller.
#[derive(Debug)]
pub enum ReadyError {
    /// The worker has not signalled yet. The handle can be waited on again.
    TimedOut(PendingCaller),
    /// The worker failed during initialization.
    Failed(CallError),
}

impl fmt::Display for ReadyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyError::TimedOut(_) => write!(f, "worker did not become ready in time"),
            ReadyError::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReadyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadyError::TimedOut(_) => None,
            ReadyError::Failed(e) => Some(e),
        }
    }
}

impl PendingCaller {
    pub fn new(transport: SharedMemoryTransport) -> Self {
        Self { transport }
    }

    /// Block until the worker finishes initializing.
    ///
    /// Fails with [`CallError::WorkerFailed`] if the worker could not
    /// register its handlers.
    pub fn wait_ready(self) -> Result<Caller, CallError> {
        let payload = self.transport.wait_ready();
        self.into_caller(&payload)
    }

    /// Like [`wait_ready`](Self::wait_ready), giving up after `timeout`.
    pub fn wait_ready_timeout(self, timeout: Duration) -> Result<Caller, ReadyError> {
        match self.transport.wait_ready_timeout(timeout) {
            Some(payload) => self.into_caller(&payload).map_err(ReadyError::Failed),
            None => Err(ReadyError::TimedOut(self)),
        }
    }

    fn into_caller(self, payload: &[u8]) -> Result<Caller, CallError> {
        // The ready signal leaves the payload cleared; anything else is a
        // failure notice.
        if payload.iter().any(|&b| b != 0) {
            let message = match self.transport.encoding().decode::<Response>(payload) {
                Ok(Response::WorkerFailed { message }) => message,
                Ok(other) => format!("unexpected ready payload: {other:?}"),
                Err(e) => e.to_string(),
            };
            tracing::error!(%message, "worker failed before becoming ready");
            return Err(CallError::WorkerFailed(message));
        }
        tracing::debug!("worker ready");
        Ok(Caller {
            transport: self.transport,
            poisoned: false,
            closed: false,
            calls: 0,
        })
    }
}

/// Issues requests to the worker, one at a time.
///
/// `call` takes `&mut self`: a second request cannot be started while the
/// first is in flight.
///
/// Dropping a caller that is neither poisoned nor shut down sends `$shutdown`
/// and blocks until the worker acknowledges it, so the worker thread can be
/// joined afterwards.
#[derive(Debug)]
pub struct Caller {
    transport: SharedMemoryTransport,
    poisoned: bool,
    closed: bool,
    calls: u64,
}

impl Caller {
    /// Send `kind(args)` and block until the worker answers.
    ///
    /// There is no timeout. The call returns when the worker replies or
    /// fails, and never otherwise.
    pub fn call(&mut self, kind: &str, args: Vec<Value>) -> Result<Value, CallError> {
        if kind.is_empty() {
            return Err(CallError::EmptyKind);
        }
        if kind.starts_with(RESERVED_KIND_PREFIX) {
            return Err(CallError::ReservedKind(kind.to_owned()));
        }
        self.round_trip(&Request::new(kind, args))
    }

    /// Ask the worker to leave its loop and wait for its acknowledgement.
    pub fn shutdown(mut self) -> Result<(), CallError> {
        self.close()
    }

    fn close(&mut self) -> Result<(), CallError> {
        let result = self.round_trip(&Request::shutdown()).map(|_| ());
        self.closed = true;
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Requests answered so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn payload_capacity(&self) -> usize {
        self.transport.payload_capacity()
    }

    fn round_trip(&mut self, request: &Request) -> Result<Value, CallError> {
        if self.poisoned {
            return Err(CallError::Poisoned);
        }
        let encoding = self.transport.encoding();
        let bytes = encoding.encode(request).map_err(CallError::Encode)?;
        tracing::debug!(kind = %request.kind, len = bytes.len(), "sending request");

        let reply = self
            .transport
            .send_and_block(&bytes)
            .map_err(CallError::Overflow)?;

        let response: Response = match encoding.decode(&reply) {
            Ok(response) => response,
            Err(e) => {
                self.poisoned = true;
                return Err(CallError::Decode(e));
            }
        };
        self.calls += 1;
        match response {
            Response::Return(value) => Ok(value),
            Response::HandlerFailed { kind, message } => Err(CallError::Handler { kind, message }),
            Response::WorkerFailed { message } => {
                self.poisoned = true;
                tracing::error!(kind = %request.kind, %message, "worker failed during call");
                Err(CallError::WorkerFailed(message))
            }
        }
    }
}

impl Drop for Caller {
    fn drop(&mut self) {
        if self.closed || self.poisoned || std::thread::panicking() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "worker did not acknowledge {SHUTDOWN_KIND}");
        }
    }
}
