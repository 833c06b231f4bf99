use std::{alloc::Layout, cell::Cell, ptr, ptr::NonNull};

use crate::{
    config::{check, DEBUG_CHECKS, INTROSPECTION, SOFT_LIMIT},
    pair::{Pair, PairLayout},
    Allocator, Error,
};

thread_local! {
    static LIVE_BLOCKS: Cell<usize> = const { Cell::new(0) };
}

/// Number of control blocks alive on the current thread.
///
/// Handles never leave the thread that created them, so every block is counted and released on
/// the same thread.
#[cfg(any(test, feature = "introspection"))]
pub fn live_blocks() -> usize {
    LIVE_BLOCKS.try_with(Cell::get).unwrap_or(0)
}

fn register(delta: isize) {
    if INTROSPECTION {
        let _ = LIVE_BLOCKS.try_with(|n| n.set(n.get().wrapping_add_signed(delta)));
    }
}

/// Shared bookkeeping for one managed value.
///
/// Rules:
/// - `strong` is 1 and `weak` is 0 at creation.
/// - once `strong` reaches 0 it never increases again, and the payload is dropped exactly then.
/// - the block itself is freed once both counts are 0.
pub(crate) struct Block {
    strong: Cell<u32>,
    weak: Cell<u32>,
    payload: NonNull<u8>,
    variant: Variant,
    alloc: &'static dyn Allocator,
}

/// How the payload's memory was obtained, which decides who frees it.
#[derive(Clone, Copy)]
enum Variant {
    /// The payload is a `Box` of its own. Dropping it also frees it.
    Standalone { drop_box: unsafe fn(NonNull<u8>) },
    /// The payload shares the block's allocation, described by `layout`. Dropping it leaves the
    /// memory in place until the block goes away.
    Inline {
        drop_in_place: unsafe fn(NonNull<u8>),
        layout: Layout,
    },
}

unsafe fn drop_box<T>(payload: NonNull<u8>) {
    drop(Box::from_raw(payload.cast::<T>().as_ptr()));
}

unsafe fn drop_in_place<T>(payload: NonNull<u8>) {
    ptr::drop_in_place(payload.cast::<T>().as_ptr());
}

impl Block {
    /// Takes ownership of `payload` and allocates a separate block for it. On failure the
    /// payload is dropped. Returns the block and where the payload now lives.
    pub(crate) fn standalone<T>(
        payload: Box<T>,
        alloc: &'static dyn Allocator,
    ) -> Result<(NonNull<Block>, NonNull<T>), Error> {
        let at = alloc.allocate(Layout::new::<Block>())?.cast::<Block>();
        let payload = NonNull::from(Box::leak(payload));

        unsafe {
            at.as_ptr().write(Block::fresh(
                payload.cast::<u8>(),
                Variant::Standalone {
                    drop_box: drop_box::<T>,
                },
                alloc,
            ))
        };

        Ok((at, payload))
    }

    /// Writes a block into the first region of `pair`, taking over the `T` already written into
    /// the second region.
    ///
    /// # Safety
    ///
    /// `pair` must come from `alloc` with a layout of `PairLayout::of::<Block, T>()`, and its
    /// second region must hold an initialized `T`.
    pub(crate) unsafe fn inline<T>(pair: Pair, alloc: &'static dyn Allocator) -> NonNull<Block> {
        debug_assert!(pair.layout() == PairLayout::of::<Block, T>().unwrap());

        let at = pair.first().cast::<Block>();
        at.as_ptr().write(Block::fresh(
            pair.second(),
            Variant::Inline {
                drop_in_place: drop_in_place::<T>,
                layout: pair.layout().total(),
            },
            alloc,
        ));

        at
    }

    fn fresh(payload: NonNull<u8>, variant: Variant, alloc: &'static dyn Allocator) -> Block {
        register(1);
        if DEBUG_CHECKS {
            log::trace!("control block created for payload at {:p}", payload);
        }

        Block {
            strong: Cell::new(1),
            weak: Cell::new(0),
            payload,
            variant,
            alloc,
        }
    }

    pub(crate) fn add_shared(&self) {
        let n = self.strong.get();
        check!(n > 0, "strong reference added to a released payload");
        check!(n < SOFT_LIMIT, "{} strong references, likely leaked", n);

        if n == u32::MAX {
            std::process::abort();
        }
        self.strong.set(n + 1);
    }

    pub(crate) fn add_weak(&self) {
        let n = self.weak.get();
        check!(n < SOFT_LIMIT, "{} weak references, likely leaked", n);

        if n == u32::MAX {
            std::process::abort();
        }
        self.weak.set(n + 1);
    }

    /// Drops one strong reference. The last one drops the payload and, if no weak reference is
    /// left, frees the block.
    ///
    /// # Safety
    ///
    /// `this` must be live and the caller must own one of its strong references. The block may
    /// be freed before this returns.
    pub(crate) unsafe fn release_shared(this: NonNull<Block>) {
        let block = this.as_ref();
        let n = block.strong.get();
        check!(n > 0, "strong reference released twice");

        block.strong.set(n - 1);
        if n != 1 {
            return;
        }

        // The payload's destructor may release or lock weak references to this block. The extra
        // weak reference keeps the block alive until the destructor returns.
        block.weak.set(block.weak.get() + 1);
        match block.variant {
            Variant::Standalone { drop_box } => drop_box(block.payload),
            Variant::Inline { drop_in_place, .. } => drop_in_place(block.payload),
        }
        block.weak.set(block.weak.get() - 1);

        Block::finalize(this);
    }

    /// # Safety
    ///
    /// `this` must be live and the caller must own one of its weak references. The block may be
    /// freed before this returns.
    pub(crate) unsafe fn release_weak(this: NonNull<Block>) {
        let block = this.as_ref();
        let n = block.weak.get();
        check!(n > 0, "weak reference released twice");

        block.weak.set(n - 1);
        if n == 1 {
            Block::finalize(this);
        }
    }

    unsafe fn finalize(this: NonNull<Block>) {
        let block = this.as_ref();
        if block.strong.get() != 0 || block.weak.get() != 0 {
            return;
        }

        let alloc = block.alloc;
        let layout = match block.variant {
            Variant::Standalone { .. } => Layout::new::<Block>(),
            // reclaims the payload's storage as well
            Variant::Inline { layout, .. } => layout,
        };

        register(-1);
        if DEBUG_CHECKS {
            log::trace!("control block at {:p} released", this);
        }

        alloc.deallocate(this.cast::<u8>(), layout);
    }

    pub(crate) fn has_shared_references(&self) -> bool {
        self.strong.get() > 0
    }

    pub(crate) fn payload(&self) -> NonNull<u8> {
        self.payload
    }

    pub(crate) fn strong(&self) -> u32 {
        self.strong.get()
    }

    pub(crate) fn weak(&self) -> u32 {
        self.weak.get()
    }
}
