use std::time::{Duration, Instant};

use crate::sync::{AtomicU32, Ordering};
use crate::wait;

/// The caller's data is valid and the caller acts next; the worker is idle.
pub const CALLER_TURN: u32 = 0;

/// The worker's data is valid and the worker acts next; the caller is idle.
pub const WORKER_TURN: u32 = 1;

/// A 32-bit cell recording whose turn it is to touch the payload.
///
/// Exactly one side acts at a time; the other sleeps in [`wait`](Self::wait).
/// Turns only move through [`signal`](Self::signal), which stores the new
/// value before waking sleepers.
#[repr(transparent)]
pub struct LockWord {
    value: AtomicU32,
}

#[cfg(not(feature = "loom"))]
static_assertions::assert_eq_size!(LockWord, u32);
#[cfg(not(feature = "loom"))]
static_assertions::assert_eq_align!(LockWord, u32);

impl LockWord {
    pub fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Write a fresh lock word at `ptr` and return a reference to it.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for writes, aligned for `u32`, and not yet shared
    ///   with the other side.
    /// - The memory must outlive the returned reference.
    pub unsafe fn init_at<'a>(ptr: *mut LockWord, initial: u32) -> &'a LockWord {
        unsafe {
            ptr.write(Self::new(initial));
            &*ptr
        }
    }

    /// Borrow a lock word that already lives in shared memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized lock word that outlives the
    /// returned reference.
    pub unsafe fn from_ptr<'a>(ptr: *const LockWord) -> &'a LockWord {
        unsafe { &*ptr }
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Block until the word is observed to differ from `expected`.
    ///
    /// Returns immediately if it already differs.
    pub fn wait(&self, expected: u32) {
        while self.load() == expected {
            wait::wait(&self.value, expected, None);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `true` once the word differs from `expected`, `false` if the
    /// deadline passed first. A timeout too large to form a deadline waits
    /// without one.
    pub fn wait_timeout(&self, expected: u32, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait(expected);
            return true;
        };
        loop {
            if self.load() != expected {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            wait::wait(&self.value, expected, Some(deadline - now));
        }
    }

    /// Store `value`, then wake every thread blocked on this word.
    pub fn signal(&self, value: u32) {
        self.value.store(value, Ordering::Release);
        wait::wake_all(&self.value);
    }
}

impl std::fmt::Debug for LockWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let turn = match self.load() {
            CALLER_TURN => "caller",
            WORKER_TURN => "worker",
            _ => "invalid",
        };
        f.debug_struct("LockWord")
            .field("value", &self.load())
            .field("turn", &turn)
            .finish()
    }
}
