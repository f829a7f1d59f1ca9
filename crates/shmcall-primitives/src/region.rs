use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// Alignment guaranteed for regions allocated by [`HeapRegion`].
pub const REGION_ALIGN: usize = 64;

/// A view of a shared byte region.
///
/// `Region` does not own its memory. Whoever created it (a [`HeapRegion`], an
/// mmap, a bootstrap collaborator) must keep the memory alive for as long as
/// any view is in use.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a Region is only an address and a length. Access to the bytes it
// covers is serialized by the lock word protocol, not by this type.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region view from a raw pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for reads and writes of `len` bytes.
    /// - The memory must remain valid for as long as the view (and any copy of
    ///   it) is used.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Pointer to `offset` bytes into the region.
    ///
    /// Panics if `offset + size_of::<T>()` exceeds the region or the resulting
    /// address is not aligned for `T`.
    pub fn ptr_at<T>(&self, offset: usize) -> *mut T {
        let in_bounds = offset
            .checked_add(core::mem::size_of::<T>())
            .is_some_and(|end| end <= self.len);
        assert!(in_bounds, "region access out of bounds");
        // SAFETY: offset is within the region, checked above.
        let ptr = unsafe { self.ptr.as_ptr().add(offset) };
        assert!(
            (ptr as usize).is_multiple_of(core::mem::align_of::<T>()),
            "region access misaligned"
        );
        ptr.cast()
    }

    /// Sub-view starting at `offset` and running to the end of the region.
    pub fn tail(&self, offset: usize) -> Region {
        assert!(offset <= self.len, "region offset out of bounds");
        // SAFETY: offset <= len, so the pointer stays in (or one past) the
        // allocation and is non-null.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) };
        Region {
            ptr,
            len: self.len - offset,
        }
    }
}

/// A zero-filled heap allocation standing in for a shared mapping.
///
/// Both threads of a call channel live in one process, so a plain heap
/// allocation shared through an `Arc` is all the "shared memory" they need.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: HeapRegion owns its allocation; concurrent access to the bytes goes
// through `Region` views and is governed by the lock word.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate `len` zeroed bytes aligned to [`REGION_ALIGN`].
    ///
    /// Panics if `len` is zero; aborts on allocation failure like any other
    /// std allocation.
    pub fn new_zeroed(len: usize) -> Self {
        assert!(len > 0, "region length must be > 0");
        let Ok(layout) = Layout::from_size_align(len, REGION_ALIGN) else {
            panic!("region length {len} overflows the address space");
        };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// A view of the whole allocation.
    pub fn region(&self) -> Region {
        // SAFETY: the allocation is valid for `len` bytes while `self` lives;
        // callers keep the HeapRegion alive alongside every view.
        unsafe { Region::from_raw(self.ptr, self.layout.size()) }
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.layout.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_region_is_zeroed_and_aligned() {
        let owner = HeapRegion::new_zeroed(2048);
        let region = owner.region();
        assert_eq!(region.len(), 2048);
        assert!((region.as_ptr() as usize).is_multiple_of(REGION_ALIGN));
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn tail_view_skips_prefix() {
        let owner = HeapRegion::new_zeroed(64);
        let region = owner.region();
        let tail = region.tail(4);
        assert_eq!(tail.len(), 60);
        assert_eq!(tail.as_ptr() as usize, region.as_ptr() as usize + 4);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn ptr_at_rejects_out_of_bounds() {
        let owner = HeapRegion::new_zeroed(8);
        let _ = owner.region().ptr_at::<u64>(4);
    }

    #[test]
    #[should_panic(expected = "misaligned")]
    fn ptr_at_rejects_misaligned() {
        let owner = HeapRegion::new_zeroed(16);
        let _ = owner.region().ptr_at::<u32>(2);
    }
}
