#[cfg(not(feature = "loom"))]
pub use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "loom")]
pub use loom::thread;
#[cfg(all(not(feature = "loom"), test))]
pub use std::thread;
