//! A single allocation shared by two differently aligned objects.
//!
//! The first object sits at the base of the allocation, which the allocator already aligns for
//! it. The second object starts right behind the first, moved forward to its own alignment.
//! Because the padding depends on the address the allocator hands out, every allocation
//! reserves `align - 1` spare bytes for it.

use std::{alloc::Layout, ptr::NonNull};

use crate::{config::check, Allocator, Error};

/// Returns the smallest `padding` such that `offset + padding` is a multiple of `align`.
///
/// `align` must be a power of two.
///
/// ```
/// # use ncrc::pair::padding;
/// assert!(padding(13, 8) == 3);
/// assert!(padding(16, 8) == 0);
/// assert!(padding(5, 1) == 0);
/// ```
#[inline(always)]
pub fn padding(offset: usize, align: usize) -> usize {
    check!(
        align.is_power_of_two(),
        "alignment {} is not a power of two",
        align
    );

    let mask = align.wrapping_sub(1);
    align.wrapping_sub(offset & mask) & mask
}

/// Sizes and alignments of both halves of a [`Pair`], plus the layout requested from the
/// allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairLayout {
    first: Layout,
    second: Layout,
    total: Layout,
}

impl PairLayout {
    /// Fails if the combined size does not fit a [`Layout`].
    pub fn new(first: Layout, second: Layout) -> Result<Self, Error> {
        let size = second
            .size()
            .checked_add(second.align() - 1)
            .and_then(|size| size.checked_add(first.size()))
            .ok_or_else(|| Error::layout_overflow(first, second))?;

        let total = Layout::from_size_align(size, first.align())
            .map_err(|_| Error::layout_overflow(first, second))?;

        Ok(PairLayout {
            first,
            second,
            total,
        })
    }

    /// Layout for an `A` followed by a `B`.
    pub fn of<A, B>() -> Result<Self, Error> {
        Self::new(Layout::new::<A>(), Layout::new::<B>())
    }

    pub fn first(&self) -> Layout {
        self.first
    }

    pub fn second(&self) -> Layout {
        self.second
    }

    /// What is requested from, and later returned to, the allocator.
    pub fn total(&self) -> Layout {
        self.total
    }
}

/// A raw allocation split into two sub-regions. Neither region is initialized.
#[derive(Clone, Copy, Debug)]
pub struct Pair {
    base: NonNull<u8>,
    second: NonNull<u8>,
    layout: PairLayout,
}

impl Pair {
    /// Requests `layout.total()` from `alloc` and places the second region.
    pub fn allocate(layout: PairLayout, alloc: &dyn Allocator) -> Result<Pair, Error> {
        let base = alloc.allocate(layout.total)?;

        let first_end = base.as_ptr() as usize + layout.first.size();
        let offset = layout.first.size() + padding(first_end, layout.second.align());

        // the spare `align - 1` bytes in `total` keep `offset + second.size()` in bounds
        let second = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };

        Ok(Pair {
            base,
            second,
            layout,
        })
    }

    /// Start of the allocation, where the first object lives.
    pub fn first(&self) -> NonNull<u8> {
        self.base
    }

    pub fn second(&self) -> NonNull<u8> {
        self.second
    }

    pub fn second_offset(&self) -> usize {
        self.second.as_ptr() as usize - self.base.as_ptr() as usize
    }

    pub fn layout(&self) -> PairLayout {
        self.layout
    }

    /// Returns the whole allocation to `alloc`.
    ///
    /// # Safety
    ///
    /// The pair must come from [`Pair::allocate`] on the same allocator, anything living in
    /// either region must already be dropped, and neither region may be used afterwards.
    pub unsafe fn deallocate(self, alloc: &dyn Allocator) {
        alloc.deallocate(self.base, self.layout.total)
    }
}
