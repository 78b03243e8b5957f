//! Swap buffer for shared-stack fibers
//!
//! When many logical fibers multiplex one physical stack region, the live
//! bytes of the outgoing fiber have to be copied out before the incoming
//! fiber's bytes are copied back in. `StackBuffer` is that heap-side
//! buffer; the region math lives on the fiber, which owns the saved stack
//! pointer and the stack bounds.

use std::ptr;

/// Heap buffer retaining a suspended fiber's live stack bytes
pub(crate) struct StackBuffer {
    /// Allocated storage; empty until the first save
    storage: Vec<u8>,

    /// Bytes of stack content currently saved
    used: usize,
}

impl StackBuffer {
    pub(crate) const fn new() -> StackBuffer {
        StackBuffer {
            storage: Vec::new(),
            used: 0,
        }
    }

    /// Bytes currently allocated for swap storage
    #[inline]
    pub(crate) fn allocated_len(&self) -> usize {
        self.storage.len()
    }

    /// Bytes of stack content held from the last save
    #[inline]
    pub(crate) fn saved_len(&self) -> usize {
        self.used
    }

    /// Copy `len` live stack bytes starting at `lo` into the buffer.
    ///
    /// The allocation is the larger of `len` and `swap_min`, rounded up to
    /// a whole kilobyte so small fluctuations in stack depth don't cause a
    /// reallocation on every switch. Reallocates only when that size
    /// changes.
    ///
    /// # Safety
    ///
    /// `lo..lo+len` must be a readable region not overlapping the buffer.
    pub(crate) unsafe fn save(&mut self, lo: *const u8, len: usize, swap_min: usize) {
        let want = len.max(swap_min);

        // Round to a KB boundary to avoid frequent reallocations.
        let want = ((want >> 10) + 1) << 10;

        if want != self.storage.len() {
            self.storage = vec![0u8; want];
        }

        debug_assert!(len <= self.storage.len());
        ptr::copy_nonoverlapping(lo, self.storage.as_mut_ptr(), len);
        self.used = len;
    }

    /// Copy previously saved content back to `lo`. Does nothing if no
    /// content has ever been saved.
    ///
    /// # Safety
    ///
    /// `lo..lo+saved_len()` must be writable and must be the same region
    /// the content was saved from (the suspended fiber's stack pointer has
    /// not moved since).
    pub(crate) unsafe fn restore(&self, lo: *mut u8) {
        if self.storage.is_empty() {
            return;
        }
        ptr::copy_nonoverlapping(self.storage.as_ptr(), lo, self.used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_restore_round_trip() {
        let mut buf = StackBuffer::new();
        let mut region = [0u8; 300];
        for (i, b) in region.iter_mut().enumerate() {
            *b = i as u8;
        }

        unsafe { buf.save(region.as_ptr(), region.len(), 0) };
        assert_eq!(buf.saved_len(), 300);

        region.fill(0);
        unsafe { buf.restore(region.as_mut_ptr()) };
        for (i, b) in region.iter().enumerate() {
            assert_eq!(*b, i as u8);
        }
    }

    #[test]
    fn test_restore_without_save_is_noop() {
        let buf = StackBuffer::new();
        let mut region = [7u8; 64];
        unsafe { buf.restore(region.as_mut_ptr()) };
        assert!(region.iter().all(|&b| b == 7));
        assert_eq!(buf.allocated_len(), 0);
    }

    #[test]
    fn test_allocation_rounds_to_kilobytes() {
        let mut buf = StackBuffer::new();
        let region = [0u8; 100];

        unsafe { buf.save(region.as_ptr(), region.len(), 0) };
        assert_eq!(buf.allocated_len() % 1024, 0);
        assert!(buf.allocated_len() >= 100);

        // Same rounded size: no reallocation churn for small growth.
        let first = buf.allocated_len();
        unsafe { buf.save(region.as_ptr(), 120, 0) };
        assert_eq!(buf.allocated_len(), first);
    }

    #[test]
    fn test_swap_min_floor() {
        let mut buf = StackBuffer::new();
        let region = [0u8; 16];
        unsafe { buf.save(region.as_ptr(), region.len(), 8 * 1024) };
        assert!(buf.allocated_len() >= 8 * 1024);
        assert_eq!(buf.saved_len(), 16);
    }

    #[test]
    fn test_shrink_and_grow_tolerated() {
        let mut buf = StackBuffer::new();
        let big = vec![0xAAu8; 4096];
        let small = [0x55u8; 32];

        unsafe { buf.save(big.as_ptr(), big.len(), 0) };
        assert_eq!(buf.saved_len(), 4096);

        unsafe { buf.save(small.as_ptr(), small.len(), 0) };
        assert_eq!(buf.saved_len(), 32);

        let mut out = [0u8; 32];
        unsafe { buf.restore(out.as_mut_ptr()) };
        assert!(out.iter().all(|&b| b == 0x55));
    }
}
