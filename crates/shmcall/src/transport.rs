//! Turn-passing over one channel.
//!
//! Every operation here is blocking and byte-oriented. The caller side uses
//! [`send_and_block`](SharedMemoryTransport::send_and_block); the worker side
//! loops on [`receive_and_block`](SharedMemoryTransport::receive_and_block)
//! and [`reply`](SharedMemoryTransport::reply).

use std::sync::Arc;
use std::time::Duration;

use shmcall_codec::Encoding;
use shmcall_primitives::{CALLER_TURN, PayloadTooLarge, WORKER_TURN};

use crate::layout::Channel;

/// Both sides hold a clone; only the side holding the turn touches the
/// payload.
#[derive(Clone, Debug)]
pub struct SharedMemoryTransport {
    channel: Arc<Channel>,
}

impl SharedMemoryTransport {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn encoding(&self) -> Encoding {
        self.channel.encoding()
    }

    pub fn payload_capacity(&self) -> usize {
        self.channel.payload_capacity()
    }

    /// Block until the lock word differs from `expected`.
    pub fn wait(&self, expected: u32) {
        self.channel.lock_word().wait(expected);
    }

    /// Bounded [`wait`](Self::wait); `false` if the turn never moved.
    pub fn wait_timeout(&self, expected: u32, timeout: Duration) -> bool {
        self.channel.lock_word().wait_timeout(expected, timeout)
    }

    /// Store `value`, then wake the other side.
    pub fn signal(&self, value: u32) {
        self.channel.lock_word().signal(value);
    }

    pub fn is_workers_turn(&self) -> bool {
        self.channel.lock_word().load() == WORKER_TURN
    }

    /// Caller: write the request, hand the turn over, sleep until the worker
    /// hands it back, and return the whole payload region.
    ///
    /// An oversized request is rejected before the turn moves; the payload is
    /// left cleared and the caller still holds the turn.
    pub fn send_and_block(&self, request: &[u8]) -> Result<Vec<u8>, PayloadTooLarge> {
        let payload = self.channel.payload();
        payload.write(request)?;
        tracing::trace!(len = request.len(), "request written");
        self.signal(WORKER_TURN);
        self.wait(WORKER_TURN);
        tracing::trace!("turn returned to caller");
        Ok(payload.read())
    }

    /// Worker: sleep until the caller hands the turn over, then return the
    /// whole payload region.
    pub fn receive_and_block(&self) -> Vec<u8> {
        self.wait(CALLER_TURN);
        self.channel.payload().read()
    }

    /// Worker: clear the payload, write the response, hand the turn back.
    ///
    /// On overflow the payload is left cleared and the worker keeps the turn.
    pub fn reply(&self, response: &[u8]) -> Result<(), PayloadTooLarge> {
        self.channel.payload().write(response)?;
        tracing::trace!(len = response.len(), "response written");
        self.signal(CALLER_TURN);
        Ok(())
    }

    /// Worker: the one-time ready signal. The payload is cleared, which is
    /// how the caller tells readiness apart from a failure notice.
    pub fn announce_ready(&self) {
        self.channel.payload().clear();
        self.signal(CALLER_TURN);
        tracing::debug!("worker announced ready");
    }

    /// Caller: sleep until the worker's first hand-off and return the payload
    /// written with it (all zero when the worker is ready).
    pub fn wait_ready(&self) -> Vec<u8> {
        self.wait(WORKER_TURN);
        self.channel.payload().read()
    }

    /// Bounded [`wait_ready`](Self::wait_ready).
    pub fn wait_ready_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.wait_timeout(WORKER_TURN, timeout)
            .then(|| self.channel.payload().read())
    }

    /// Worker fatal path: hand the turn back unconditionally.
    pub fn release(&self) {
        self.signal(CALLER_TURN);
        tracing::debug!("caller released");
    }

    /// Worker fatal path: leave `notice` for the caller, then release it.
    ///
    /// If the notice does not fit the payload is left cleared; the caller is
    /// released either way.
    pub fn release_with_notice(&self, notice: &[u8]) {
        if let Err(e) = self.channel.payload().write(notice) {
            tracing::debug!(error = %e, "failure notice dropped");
        }
        self.release();
    }
}
