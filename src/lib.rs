//! Non-concurrent reference counted [`Strong`] and [`Weak`] pointers.
//!
//! The provided `Strong` and `Weak` pointer types are very similar to [`std::sync::Arc`] and
//! [`std::sync::Weak`], but their counters are plain integers. They are meant as a faster
//! replacement for `Arc` when nothing is shared across threads, and for that reason neither type
//! is `Send` or `Sync`.
//!
//! [`Strong::new`] places the counters (the control block) and the value in a single allocation,
//! saving one allocation per value compared to [`Strong::from_box`], which keeps the value in its
//! own `Box`. The price is that the memory of a value created with `new` is only reclaimed once
//! the last `Weak` pointer to it is gone, while a boxed value is freed as soon as the last
//! `Strong` is dropped.
//!
//! Unlike `Arc`, a `Strong` can be empty, and it can share an allocation without pointing at a
//! value: [`Strong::checked_cast`] and [`Strong::downcast`] keep the allocation alive even when
//! the cast fails, so check the result with [`Strong::is_null`].
//!
//! Values implementing [`ObserveSelf`] can hand out `Strong` pointers to themselves.
//!
//! Memory comes from an [`Allocator`], by default [`HEAP`]. Two cargo features add diagnostics
//! without changing behavior: `debug-checks` asserts the counter preconditions and flags counts
//! above [`config::SOFT_LIMIT`], and `introspection` exposes the raw counters and
//! [`live_blocks`].

mod block;
pub mod config;
mod error;
mod heap;
mod observe;
pub mod pair;
mod strong;
mod weak;

#[cfg(any(test, feature = "introspection"))]
pub use crate::block::live_blocks;
pub use crate::{
    error::Error,
    heap::{Allocator, Heap, HEAP},
    observe::{ObserveSelf, SelfSlot},
    strong::Strong,
    weak::Weak,
};

#[cfg(test)]
mod test;
