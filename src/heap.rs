use std::{alloc::Layout, fmt, ptr::NonNull};

use crate::{config::check, Error};

/// The source of raw memory for control blocks and co-allocated payloads.
///
/// Every control block remembers the allocator it came from and hands its memory back to that
/// same allocator, so allocators are passed around as `&'static dyn Allocator`.
///
/// ```
/// # use ncrc::{Strong, HEAP};
/// let s = Strong::new_in(5, &HEAP);
/// assert!(*s == 5);
/// ```
///
/// # Safety
///
/// `allocate` must return memory that is valid for reads and writes of `layout.size()` bytes,
/// aligned to `layout.align()`, and not aliased by any other live allocation. The memory stays
/// valid until it is passed back to `deallocate` with the same layout.
pub unsafe trait Allocator {
    /// Allocates a block described by `layout`. The contents are uninitialized. `layout` never
    /// has a size of zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same `layout`, and must not be
    /// used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Forwards to the global allocator.
#[derive(Clone, Copy, Default)]
pub struct Heap;

/// The allocator used by every constructor without an `_in` suffix.
pub static HEAP: Heap = Heap;

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Heap")
    }
}

unsafe impl Allocator for Heap {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        check!(layout.size() > 0, "zero sized allocation requested");

        NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or_else(|| {
            log::warn!(
                "global allocator refused {} bytes aligned to {}",
                layout.size(),
                layout.align()
            );
            Error::out_of_memory(layout)
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout)
    }
}
