//! Channel memory layout.
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ lock word    │ payload                             │
//! │ offset 0     │ offset 4, size - 4 bytes            │
//! └──────────────┴─────────────────────────────────────┘
//! ```
//!
//! The split is fixed for the life of the channel and never grows.

use std::fmt;
use std::sync::Arc;

use shmcall_codec::Encoding;
use shmcall_primitives::{HeapRegion, LockWord, PayloadBuffer, Region, WORKER_TURN};

use crate::config::ChannelConfig;
use crate::error::LayoutError;

pub const LOCK_WORD_OFFSET: usize = 0;
pub const LOCK_WORD_SIZE: usize = 4;
pub const PAYLOAD_OFFSET: usize = LOCK_WORD_OFFSET + LOCK_WORD_SIZE;

/// Total channel size used unless configured otherwise.
pub const DEFAULT_CHANNEL_SIZE: usize = 2048;
pub const DEFAULT_PAYLOAD_CAPACITY: usize = DEFAULT_CHANNEL_SIZE - LOCK_WORD_SIZE;

/// Smallest channel accepted; leaves room for a shutdown request and a short
/// failure notice.
pub const MIN_CHANNEL_SIZE: usize = 64;

const _: () = assert!(core::mem::size_of::<LockWord>() == LOCK_WORD_SIZE);
const _: () = assert!(DEFAULT_PAYLOAD_CAPACITY == 2044);

/// One shared channel: lock word followed by the payload region.
///
/// Cloned into both threads through an `Arc`. When the channel allocated its
/// own memory, the allocation is freed only after both sides drop it.
pub struct Channel {
    region: Region,
    encoding: Encoding,
    _owner: Option<HeapRegion>,
}

impl Channel {
    /// Allocate a zeroed channel with the lock word set to [`WORKER_TURN`].
    ///
    /// The worker holds the turn while it initializes; its ready signal is
    /// the first hand-off to the caller.
    pub fn new(config: &ChannelConfig) -> Result<Arc<Channel>, LayoutError> {
        config.validate()?;
        let owner = HeapRegion::new_zeroed(config.size);
        let region = owner.region();
        // SAFETY: freshly allocated, zeroed, 64-byte aligned, not yet shared.
        unsafe { LockWord::init_at(region.ptr_at::<LockWord>(LOCK_WORD_OFFSET), WORKER_TURN) };
        Ok(Arc::new(Channel {
            region,
            encoding: config.encoding,
            _owner: Some(owner),
        }))
    }

    /// Lay a channel out in memory supplied by someone else, initializing the
    /// lock word to [`WORKER_TURN`] and clearing the payload.
    ///
    /// # Safety
    ///
    /// The region must stay valid for the life of the returned channel, and
    /// the other side must not touch it until this call returns.
    pub unsafe fn init_in(region: Region, encoding: Encoding) -> Result<Arc<Channel>, LayoutError> {
        check_region(&region)?;
        unsafe { LockWord::init_at(region.ptr_at::<LockWord>(LOCK_WORD_OFFSET), WORKER_TURN) };
        let channel = Channel {
            region,
            encoding,
            _owner: None,
        };
        channel.payload().clear();
        Ok(Arc::new(channel))
    }

    /// Attach to a channel the other side has already initialized.
    ///
    /// # Safety
    ///
    /// The region must stay valid for the life of the returned channel and
    /// must already hold an initialized lock word.
    pub unsafe fn attach(region: Region, encoding: Encoding) -> Result<Arc<Channel>, LayoutError> {
        check_region(&region)?;
        Ok(Arc::new(Channel {
            region,
            encoding,
            _owner: None,
        }))
    }

    pub fn lock_word(&self) -> &LockWord {
        // SAFETY: the constructors checked size and alignment and the lock
        // word was initialized before the channel was shared.
        unsafe { LockWord::from_ptr(self.region.ptr_at::<LockWord>(LOCK_WORD_OFFSET)) }
    }

    pub fn payload(&self) -> PayloadBuffer {
        // SAFETY: exclusive access to the payload is governed by the lock
        // word; the transport only touches it while holding the turn.
        unsafe { PayloadBuffer::from_region(self.region.tail(PAYLOAD_OFFSET)) }
    }

    pub fn size(&self) -> usize {
        self.region.len()
    }

    pub fn payload_capacity(&self) -> usize {
        self.region.len() - PAYLOAD_OFFSET
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

fn check_region(region: &Region) -> Result<(), LayoutError> {
    if region.len() < MIN_CHANNEL_SIZE {
        return Err(LayoutError::TooSmall {
            size: region.len(),
            min: MIN_CHANNEL_SIZE,
        });
    }
    let addr = region.as_ptr() as usize;
    if !addr.is_multiple_of(core::mem::align_of::<LockWord>()) {
        return Err(LayoutError::Misaligned { addr });
    }
    Ok(())
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("size", &self.size())
            .field("encoding", &self.encoding)
            .field("lock_word", self.lock_word())
            .finish()
    }
}
