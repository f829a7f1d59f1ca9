use std::fmt;

use crate::region::Region;

/// Encoded bytes did not fit in the payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTooLarge {
    pub len: usize,
    pub capacity: usize,
}

impl fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "payload of {} bytes exceeds channel capacity of {} bytes",
            self.len, self.capacity
        )
    }
}

impl std::error::Error for PayloadTooLarge {}

/// Fixed-capacity byte region reused by every turn.
///
/// The buffer is zero-filled before each write so a short message never
/// leaves stale trailing bytes from a longer one.
#[derive(Clone, Copy, Debug)]
pub struct PayloadBuffer {
    region: Region,
}

impl PayloadBuffer {
    /// Wrap the payload part of a channel region.
    ///
    /// # Safety
    ///
    /// Only the side currently holding the turn may call `clear`, `write` or
    /// `read`. The lock word protocol is what makes these accesses
    /// exclusive; nothing in this type enforces it.
    pub unsafe fn from_region(region: Region) -> Self {
        Self { region }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Zero-fill the whole region.
    pub fn clear(&self) {
        // SAFETY: the region is valid for `capacity` bytes and we hold the turn.
        unsafe { std::ptr::write_bytes(self.region.as_ptr(), 0, self.region.len()) };
    }

    /// Clear the region, then copy `bytes` to its start.
    ///
    /// Oversized input is rejected before a single byte is copied; the region
    /// is left fully zeroed.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PayloadTooLarge> {
        self.clear();
        if bytes.len() > self.capacity() {
            return Err(PayloadTooLarge {
                len: bytes.len(),
                capacity: self.capacity(),
            });
        }
        // SAFETY: bytes.len() <= capacity, and `bytes` cannot alias the
        // shared region (it is an ordinary Rust borrow).
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.region.as_ptr(), bytes.len());
        }
        Ok(())
    }

    /// Copy the whole region out, trailing zero padding included.
    pub fn read(&self) -> Vec<u8> {
        // SAFETY: the region is valid for `capacity` bytes and we hold the turn.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr(), self.region.len()) }.to_vec()
    }

    pub fn is_clear(&self) -> bool {
        // SAFETY: as in `read`.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr(), self.region.len()) }
            .iter()
            .all(|&b| b == 0)
    }
}
