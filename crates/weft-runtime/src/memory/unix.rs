//! Unix stack mapping using mmap

use super::FiberStack;
use weft_core::error::MemoryError;

// Guard pages confuse the leak sanitizer's tracer when it walks thread
// memory, so they are dropped in sanitizer builds.
const GUARD_PAGES: bool = !cfg!(feature = "asan");

#[inline]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

impl FiberStack {
    /// Map a stack of at least `size` usable bytes, rounded up to whole
    /// pages, with a guard page below the usable region.
    pub fn alloc(size: usize) -> Result<FiberStack, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page = page_size();
        let usable = size
            .checked_add(page - 1)
            .ok_or(MemoryError::InvalidSize)?
            & !(page - 1);
        let guard = if GUARD_PAGES { page } else { 0 };
        let total = usable.checked_add(guard).ok_or(MemoryError::InvalidSize)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }
        let base = base as *mut u8;

        if guard != 0 {
            let ret = unsafe { libc::mprotect(base as *mut libc::c_void, guard, libc::PROT_NONE) };
            if ret != 0 {
                unsafe { libc::munmap(base as *mut libc::c_void, total) };
                return Err(MemoryError::ProtectionFailed);
            }
        }

        Ok(FiberStack { base, total, guard })
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
    }
}
