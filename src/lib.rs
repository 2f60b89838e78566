#![no_std]
//! # RcBlock: shared and weak reference counting over pluggable control blocks
//!
//! RcBlock provides single-threaded shared ownership of heap objects with a
//! companion weak handle, modelled after a control-block design: every owned
//! object is governed by a small header holding a shared count and a weak
//! count, plus a dispatch table that knows how to tear the object down and how
//! to give the block's own memory back.
//!
//! Two allocation strategies are available:
//!
//! - **Embedded**: [`allocate_shared`], [`allocate_shared_with`] and
//!   [`Shared::new`] place the header and the value in one allocation obtained
//!   from an [`Allocator`]. This is the preferred route.
//! - **Separate**: [`allocate_shared_from_pointer`] and [`Shared::from_box`]
//!   adopt an object that was constructed independently, together with a
//!   [`Deleter`] that finalizes it. Only the header is allocated.
//!
//! ```
//! use rcblock::{make_shared, Weak};
//!
//! let widget = make_shared(42);
//! let copy = widget.clone();
//! assert_eq!(rcblock::Shared::use_count(&widget), 2);
//!
//! let weak = Weak::observe(&widget).unwrap();
//! drop(copy);
//! drop(widget);
//! assert!(weak.expired());
//! assert!(weak.lock().is_empty());
//! ```
//!
//! ## Why use RcBlock?
//!
//! - Custom deleters and allocators per object, without changing the handle
//!   type: `Shared<T>` is the same type regardless of how `T` got there
//! - Weak references that keep only the header alive
//! - Aliasing handles via [`Shared::map`], including conversion to trait
//!   objects
//! - It supports `no_std` with extern alloc
//!
//! ## Why not use RcBlock?
//!
//! - Counting is not atomic. [`Shared`] and [`Weak`] are neither `Send` nor
//!   `Sync`, so the compiler keeps them on one thread
//! - Cycles of [`Shared`] handles leak; break them with [`Weak`]
//!
//! ## Handle states
//!
//! Both handles may be *empty*: a default-constructed handle, the result of
//! [`Shared::take`], [`Shared::reset`], or a failed [`Weak::lock`]. Empty
//! handles alias no block and contribute nothing to any count.
//!
//! ### Features
//!
//! By default, counters are 32 bits wide on 64-bit systems and `usize`
//! elsewhere, with the `usize-for-small-platforms` feature enabled. Disabling
//! default features halves the counter width on 32-bit and 16-bit platforms.
//! The `log` feature emits `trace` records for block creation, payload
//! teardown, storage release and allocation failures.

#![warn(missing_docs, missing_debug_implementations)]
extern crate alloc;

// Counter definition

#[cfg(target_pointer_width = "64")]
pub(crate) use u32 as ucount;

#[cfg(all(
    not(target_pointer_width = "64"),
    feature = "usize-for-small-platforms"
))]
pub(crate) use usize as ucount;

#[cfg(all(
    target_pointer_width = "32",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u16 as ucount;

#[cfg(all(
    target_pointer_width = "16",
    not(feature = "usize-for-small-platforms")
))]
pub(crate) use u8 as ucount;

#[cfg(all(target_pointer_width = "8", not(feature = "usize-for-small-platforms")))]
pub(crate) use usize as ucount;

// Slow-path tracing, compiled out unless the `log` feature is enabled.
macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        {
            log::trace!($($arg)+);
        }
    };
}

mod allocator;
mod block;
mod deleter;
mod error;
mod shared;
mod weak;

pub use allocator::*;
pub use deleter::*;
pub use error::*;
pub use shared::*;
pub use weak::*;
