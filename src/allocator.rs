use crate::AllocError;
use alloc::alloc::{alloc, dealloc};
use core::{alloc::Layout, ptr::NonNull};

/// An allocation capability consumed by the construction entry points.
///
/// The allocator is never asked for the payload type alone. Blocks request
/// storage for their own composite layout through [`Allocator::allocate_for`],
/// which plays the role of rebinding the allocator to another element type.
///
/// # Safety
///
/// Implementors must return memory that is valid for `layout` and stays valid
/// until it is passed back to [`Allocator::deallocate`] with the same layout.
/// Clones or moved values of an allocator must be able to free memory
/// allocated by the original, since blocks carry the allocator by value.
pub unsafe trait Allocator {
    /// Attempts to allocate a block of memory described by `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Deallocates the memory referenced by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Allocator::allocate`] on this
    /// allocator (or a clone of it) with the same `layout`, and must not have
    /// been deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Allocates uninitialized storage for one `U`.
    #[inline]
    fn allocate_for<U>(&self) -> Result<NonNull<U>, AllocError> {
        self.allocate(Layout::new::<U>()).map(NonNull::cast)
    }

    /// Frees storage obtained from [`Allocator::allocate_for`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::deallocate`] with `Layout::new::<U>()`.
    #[inline]
    unsafe fn deallocate_for<U>(&self, ptr: NonNull<U>) {
        self.deallocate(ptr.cast(), Layout::new::<U>())
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        (**self).deallocate(ptr, layout)
    }
}

/// The global memory allocator, backed by the `#[global_allocator]` of the
/// final binary.
///
/// # Examples
///
/// ```
/// use rcblock::{allocate_shared, Global, Shared};
///
/// let value = allocate_shared(Global, String::from("hello"));
/// assert_eq!(*value, "hello");
/// assert_eq!(Shared::use_count(&value), 1);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // SAFETY: alignment is never zero
            return Ok(unsafe { NonNull::new_unchecked(layout.align() as *mut u8) });
        }
        // SAFETY: layout has a non-zero size
        NonNull::new(unsafe { alloc(layout) }).ok_or(AllocError)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            dealloc(ptr.as_ptr(), layout)
        }
    }
}
