//! Blocking hand-off primitives for shared-memory synchronous calls.
//!
//! Two threads share one fixed region: a 4-byte [`LockWord`] saying whose
//! turn it is, followed by a fixed-capacity [`PayloadBuffer`] carrying the
//! bytes for the current turn. The side that does not hold the turn sleeps
//! in [`LockWord::wait`] and consumes no CPU until the other side calls
//! [`LockWord::signal`].
//!
//! # Wait/wake backends
//!
//! - Linux: `futex(2)` keyed on the expected value.
//! - Other targets: a process-wide mutex + condvar guarding the same check.
//! - `loom` feature: a yield loop, so the protocol can be model-checked.
//!
//! ```text
//! cargo test -p shmcall-primitives --features loom
//! ```

pub mod lock_word;
pub mod payload;
pub mod region;
pub mod sync;
mod wait;

pub use lock_word::{CALLER_TURN, LockWord, WORKER_TURN};
pub use payload::{PayloadBuffer, PayloadTooLarge};
pub use region::{HeapRegion, REGION_ALIGN, Region};
