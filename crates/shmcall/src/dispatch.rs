//! The worker side: an explicit state machine over the transport.
//!
//! ```text
//! Starting → Initializing → AnnouncingReady → AwaitingRequest
//!                                               │      ▲
//!                                               ▼      │
//!                                  Dispatching → EncodingResponse
//!
//! any state ──error──► Failed          $shutdown ──► Stopped
//! ```
//!
//! Every failure funnels through one exit: enter `Failed`, leave a
//! `WorkerFailed` notice in the payload, release the caller, and only then
//! hand the error to the fatal reporter.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures_util::FutureExt;
use shmcall_codec::{Encoding, Request, Response, Value};
use tracing::Instrument;

use crate::config::{HandlerFailurePolicy, WorkerConfig};
use crate::error::{BoxError, WorkerError};
use crate::registry::{Handler, HandlerRegistry, HandlerRegistryBuilder};
use crate::transport::SharedMemoryTransport;

/// Longest failure message, in chars, carried in a `WorkerFailed` notice.
pub const NOTICE_MESSAGE_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Initializing,
    AnnouncingReady,
    AwaitingRequest,
    Dispatching,
    EncodingResponse,
    /// Left the loop after answering `$shutdown`.
    Stopped,
    /// Hit an unrecoverable error. Never exited.
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a worker that stopped cleanly spent its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Requests dispatched to handlers, the final `$shutdown` not included.
    pub handled: u64,
}

/// What the next state needs to run.
enum Step {
    Await,
    Dispatch(Request),
    Encode { response: Response, stop: bool },
    Stop,
}

/// Serves requests from one caller until shutdown or failure.
pub struct Worker {
    transport: SharedMemoryTransport,
    config: WorkerConfig,
    state: WorkerState,
    handled: u64,
}

impl Worker {
    pub fn new(transport: SharedMemoryTransport, config: WorkerConfig) -> Self {
        Self {
            transport,
            config,
            state: WorkerState::Starting,
            handled: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Register handlers through `init`, announce readiness, then serve
    /// requests one at a time.
    ///
    /// Returns `Ok` after answering `$shutdown`. On any error the caller has
    /// been released and the fatal reporter has run by the time this
    /// returns.
    pub async fn run<F>(mut self, init: F) -> Result<WorkerExit, WorkerError>
    where
        F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError>,
    {
        let guard = ReleaseOnUnwind::new(self.transport.clone());
        let result = self.drive(init).await;
        guard.disarm();
        result.map_err(|err| self.fail(err))
    }

    /// Take the fatal path without ever running, e.g. when the worker's
    /// runtime could not be built.
    pub fn fail_to_start(mut self, err: WorkerError) -> WorkerError {
        self.fail(err)
    }

    fn enter(&mut self, next: WorkerState) {
        tracing::trace!(from = %self.state, to = %next, "worker state");
        self.state = next;
    }

    async fn drive<F>(&mut self, init: F) -> Result<WorkerExit, WorkerError>
    where
        F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError>,
    {
        self.enter(WorkerState::Initializing);
        let registry = initialize(init)?;

        self.enter(WorkerState::AnnouncingReady);
        self.transport.announce_ready();
        tracing::info!(kinds = ?registry.kinds(), "worker ready");

        let mut step = Step::Await;
        loop {
            step = match step {
                Step::Await => {
                    self.enter(WorkerState::AwaitingRequest);
                    let request = self.receive()?;
                    if request.is_shutdown() {
                        Step::Encode {
                            response: Response::Return(Value::Null),
                            stop: true,
                        }
                    } else {
                        Step::Dispatch(request)
                    }
                }
                Step::Dispatch(request) => {
                    self.enter(WorkerState::Dispatching);
                    let response = self.dispatch(&registry, request).await?;
                    Step::Encode {
                        response,
                        stop: false,
                    }
                }
                Step::Encode { response, stop } => {
                    self.enter(WorkerState::EncodingResponse);
                    self.reply(&response)?;
                    if stop { Step::Stop } else { Step::Await }
                }
                Step::Stop => {
                    self.enter(WorkerState::Stopped);
                    tracing::info!(handled = self.handled, "worker stopped");
                    return Ok(WorkerExit {
                        handled: self.handled,
                    });
                }
            };
        }
    }

    fn receive(&self) -> Result<Request, WorkerError> {
        let bytes = self.transport.receive_and_block();
        let request: Request = self
            .transport
            .encoding()
            .decode(&bytes)
            .map_err(WorkerError::Decode)?;
        tracing::debug!(kind = %request.kind, args = ?request.args, "request received");
        Ok(request)
    }

    async fn dispatch(
        &mut self,
        registry: &HandlerRegistry,
        request: Request,
    ) -> Result<Response, WorkerError> {
        let Request { kind, args } = request;
        let Some(handler) = registry.lookup(&kind) else {
            return Err(WorkerError::UnknownKind(kind));
        };
        self.handled += 1;

        let span = tracing::debug_span!("dispatch", kind = %kind);
        match invoke(handler, args).instrument(span).await {
            Ok(value) => Ok(Response::Return(value)),
            Err(message) => match self.config.failure_policy {
                HandlerFailurePolicy::Escalate => Err(WorkerError::Handler { kind, message }),
                HandlerFailurePolicy::ReplyToCaller => {
                    tracing::debug!(%kind, %message, "handler failed, replying to caller");
                    Ok(Response::HandlerFailed { kind, message })
                }
            },
        }
    }

    fn reply(&self, response: &Response) -> Result<(), WorkerError> {
        let bytes = self
            .transport
            .encoding()
            .encode(response)
            .map_err(WorkerError::Encode)?;
        self.transport.reply(&bytes).map_err(WorkerError::Overflow)?;
        tracing::debug!(?response, len = bytes.len(), "response written");
        Ok(())
    }

    fn fail(&mut self, err: WorkerError) -> WorkerError {
        self.enter(WorkerState::Failed);
        tracing::error!(class = err.class(), error = %err, "worker failed");
        let notice = failure_notice(
            self.transport.encoding(),
            &err.to_string(),
            self.transport.payload_capacity(),
        );
        self.transport.release_with_notice(&notice);
        self.config.report_fatal(&err);
        err
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state)
            .field("handled", &self.handled)
            .finish_non_exhaustive()
    }
}

fn initialize<F>(init: F) -> Result<HandlerRegistry, WorkerError>
where
    F: FnOnce(&mut HandlerRegistryBuilder) -> Result<(), BoxError>,
{
    let mut builder = HandlerRegistryBuilder::new();
    match std::panic::catch_unwind(AssertUnwindSafe(|| init(&mut builder))) {
        Ok(Ok(())) => Ok(builder.build()),
        Ok(Err(e)) => Err(WorkerError::Init(e.to_string())),
        Err(payload) => Err(WorkerError::Init(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Run one handler to completion. Errors and panics, whether raised while
/// building the future or while polling it, come back as a message.
async fn invoke(handler: Rc<dyn Handler>, args: Vec<Value>) -> Result<Value, String> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
        Ok(future) => future,
        Err(payload) => return Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Encode a `WorkerFailed` notice that fits in `capacity` bytes.
///
/// The message is cut to [`NOTICE_MESSAGE_LIMIT`] chars and shortened further
/// until the notice fits. Returns an empty buffer if even an empty message
/// does not fit.
pub(crate) fn failure_notice(encoding: Encoding, message: &str, capacity: usize) -> Vec<u8> {
    let mut limit = NOTICE_MESSAGE_LIMIT;
    loop {
        let message: String = message.chars().take(limit).collect();
        match encoding.encode(&Response::WorkerFailed { message }) {
            Ok(bytes) if bytes.len() <= capacity => return bytes,
            _ if limit == 0 => return Vec::new(),
            _ => limit /= 2,
        }
    }
}

/// Releases the caller if the worker future is dropped or unwinds while the
/// worker still holds the turn.
struct ReleaseOnUnwind {
    transport: SharedMemoryTransport,
    armed: bool,
}

impl ReleaseOnUnwind {
    fn new(transport: SharedMemoryTransport) -> Self {
        Self {
            transport,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseOnUnwind {
    fn drop(&mut self) {
        if !self.armed || !self.transport.is_workers_turn() {
            return;
        }
        let message = if std::thread::panicking() {
            "worker panicked while holding the turn"
        } else {
            "worker dropped while holding the turn"
        };
        tracing::error!("{message}");
        let notice = failure_notice(
            self.transport.encoding(),
            message,
            self.transport.payload_capacity(),
        );
        self.transport.release_with_notice(&notice);
    }
}
