use std::alloc::Layout;

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error(
        "Out of memory: failed to allocate {} bytes aligned to {}.",
        layout.size(),
        layout.align()
    )]
    OutOfMemory { layout: Layout },

    #[error(
        "Paired allocation of {} bytes and {} bytes (aligned to {}) overflows.",
        first.size(),
        second.size(),
        second.align()
    )]
    LayoutOverflow { first: Layout, second: Layout },
}

impl Error {
    #[cold]
    pub fn out_of_memory(layout: Layout) -> Self {
        Error::OutOfMemory { layout }
    }

    #[cold]
    pub fn layout_overflow(first: Layout, second: Layout) -> Self {
        Error::LayoutOverflow { first, second }
    }

    /// Diverges the way the standard smart pointers do when they cannot allocate.
    #[cold]
    pub(crate) fn raise(self) -> ! {
        match self {
            Error::OutOfMemory { layout } => std::alloc::handle_alloc_error(layout),
            Error::LayoutOverflow { .. } => panic!("{}", self),
        }
    }
}
