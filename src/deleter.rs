use alloc::boxed::Box;
use core::ptr::NonNull;

/// A destruction capability for an adopted object.
///
/// A deleter is consumed by the single call that finalizes the object, which
/// happens when the last [`Shared`][crate::Shared] handle goes away. Any
/// `FnOnce(NonNull<T>)` closure is a deleter.
///
/// # Examples
///
/// ```
/// use std::{cell::Cell, ptr::NonNull, rc::Rc};
/// use rcblock::{allocate_shared_from_pointer, Global};
///
/// let deleted = Rc::new(Cell::new(false));
/// let raw = Box::into_raw(Box::new(7));
/// let flag = deleted.clone();
/// let deleter = move |ptr: NonNull<i32>| {
///     flag.set(true);
///     drop(unsafe { Box::from_raw(ptr.as_ptr()) });
/// };
/// let shared = unsafe { allocate_shared_from_pointer(raw, deleter, Global) };
/// assert_eq!(*shared, 7);
/// drop(shared);
/// assert!(deleted.get());
/// ```
pub trait Deleter<T: ?Sized> {
    /// Finalizes the object at `ptr` and releases whatever storage it uses.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer this deleter was adopted with, and the
    /// object must not be accessed afterwards.
    unsafe fn delete(self, ptr: NonNull<T>);
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    #[inline]
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// The default deleter: reclaims a pointer produced by [`Box::into_raw`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}
