//! OS-level wait/wake keyed on a 32-bit word.
//!
//! `wait` may return spuriously; callers re-check the word in a loop.

#[cfg(all(target_os = "linux", not(feature = "loom")))]
pub(crate) use futex::{wait, wake_all};
#[cfg(feature = "loom")]
pub(crate) use model::{wait, wake_all};
#[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
pub(crate) use parking::{wait, wake_all};

#[cfg(all(target_os = "linux", not(feature = "loom")))]
mod futex {
    use std::time::Duration;

    use crate::sync::AtomicU32;

    /// Sleep while `*word == expected`. The kernel compares the value and
    /// enqueues the waiter atomically, so a store + wake that lands before the
    /// call makes it return `EAGAIN` instead of sleeping.
    pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        // EAGAIN, EINTR and ETIMEDOUT all mean "go look at the word again",
        // which every caller does.
        // SAFETY: `word` is a live, aligned u32 for the duration of the call.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                ts_ptr,
            );
        }
    }

    pub(crate) fn wake_all(word: &AtomicU32) {
        // SAFETY: `word` is a live, aligned u32 for the duration of the call.
        unsafe {
            libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
        }
    }
}

#[cfg(all(not(target_os = "linux"), not(feature = "loom")))]
mod parking {
    use std::time::Duration;

    use parking_lot::{Condvar, Mutex, const_mutex};

    use crate::sync::{AtomicU32, Ordering};

    // One condvar serves every lock word in the process. A wake notifies all
    // sleepers and each re-checks its own word.
    static PARKING: Mutex<()> = const_mutex(());
    static WAKE: Condvar = Condvar::new();

    pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
        let mut guard = PARKING.lock();
        // Checked under the mutex: a waker stores first and then takes the
        // mutex, so it cannot slip its notify between this check and the wait.
        if word.load(Ordering::Acquire) != expected {
            return;
        }
        match timeout {
            Some(timeout) => {
                WAKE.wait_for(&mut guard, timeout);
            }
            None => WAKE.wait(&mut guard),
        }
    }

    pub(crate) fn wake_all(_word: &AtomicU32) {
        drop(PARKING.lock());
        WAKE.notify_all();
    }
}

#[cfg(feature = "loom")]
mod model {
    use std::time::Duration;

    use crate::sync::{AtomicU32, Ordering};

    pub(crate) fn wait(word: &AtomicU32, expected: u32, _timeout: Option<Duration>) {
        if word.load(Ordering::Acquire) == expected {
            loom::thread::yield_now();
        }
    }

    pub(crate) fn wake_all(_word: &AtomicU32) {}
}
