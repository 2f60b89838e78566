use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use thiserror::Error;

/// Errors reported by the fallible constructors of [`Shared`][crate::Shared]
/// and [`Weak`][crate::Weak].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The allocator refused to provide storage for a control block.
    #[error("control block allocation of {} bytes (align {}) failed", .layout.size(), .layout.align())]
    Alloc {
        /// Layout of the block that could not be allocated.
        layout: Layout,
    },

    /// A weak handle was requested for an empty shared handle.
    #[error("cannot observe an empty shared handle")]
    EmptyHandle,
}

impl Error {
    #[inline]
    pub(crate) fn alloc(layout: Layout) -> Self {
        trace!("allocation of {:?} failed", layout);
        Error::Alloc { layout }
    }

    // Escalates an error from an infallible constructor. Allocation failures go
    // through the global allocation error handler like `Box::new` does.
    #[cold]
    #[inline(never)]
    pub(crate) fn raise(self) -> ! {
        match self {
            Error::Alloc { layout } => handle_alloc_error(layout),
            err => panic!("{}", err),
        }
    }
}

/// The error type returned by an [`Allocator`][crate::Allocator] that could
/// not satisfy a request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("memory allocation failed")]
pub struct AllocError;
