use crate::{block::BlockRef, Error, Shared};
use core::{fmt, mem, ptr::NonNull};

/// [`Weak<T>`] observes a block owned by [`Shared`] handles without keeping
/// the payload alive.
///
/// A weak handle keeps only the block's header allocated. It can tell whether
/// the payload is still alive and try to become an owner again through
/// [`Weak::lock`]. Like [`Shared`], it may be empty.
///
/// # Examples
///
/// ```
/// use rcblock::{Shared, Weak};
///
/// let mut owner = Shared::new(String::from("alive"));
/// let weak = Weak::observe(&owner).unwrap();
/// assert_eq!(*weak.lock(), "alive");
///
/// owner.reset();
/// assert!(weak.expired());
/// assert!(weak.lock().is_empty());
/// ```
pub struct Weak<T: ?Sized> {
    // Cached payload pointer, only dereferenced while the block has owners.
    ptr: Option<NonNull<T>>,
    block: Option<BlockRef>,
}

impl<T: ?Sized> Weak<T> {
    /// Creates an empty weak handle. It is always expired.
    #[inline]
    pub const fn new() -> Weak<T> {
        Weak {
            ptr: None,
            block: None,
        }
    }

    /// Starts observing the block of `shared`.
    ///
    /// An empty `shared` has no block to observe and is rejected with
    /// [`Error::EmptyHandle`].
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::{Error, Shared, Weak};
    ///
    /// let owner = Shared::new(1);
    /// let weak = Weak::observe(&owner).unwrap();
    /// assert_eq!(weak.weak_count(), 1);
    ///
    /// let empty = Shared::<i32>::empty();
    /// assert_eq!(Weak::observe(&empty).unwrap_err(), Error::EmptyHandle);
    /// ```
    pub fn observe(shared: &Shared<T>) -> Result<Weak<T>, Error> {
        let (ptr, block) = shared.parts().ok_or(Error::EmptyHandle)?;
        block.acquire_weak();
        Ok(Weak {
            ptr: Some(ptr),
            block: Some(block),
        })
    }

    #[inline]
    pub(crate) fn parts(&self) -> Option<(NonNull<T>, BlockRef)> {
        match (self.ptr, self.block) {
            (Some(ptr), Some(block)) => Some((ptr, block)),
            _ => None,
        }
    }

    /// Returns `true` if this handle aliases no block.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Returns `true` once the payload was torn down. An empty handle is
    /// always expired.
    #[inline]
    #[must_use]
    pub fn expired(&self) -> bool {
        self.block.map_or(true, |block| block.shared_count() == 0)
    }

    /// Becomes an owner of the payload if it is still alive, otherwise returns
    /// an empty [`Shared`]. A successful lock adds exactly one owner.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::{Shared, Weak};
    ///
    /// let owner = Shared::new(5);
    /// let weak = Weak::observe(&owner).unwrap();
    /// let locked = weak.lock();
    /// assert_eq!(Shared::use_count(&owner), 2);
    /// drop((owner, locked));
    /// assert!(weak.lock().is_empty());
    /// ```
    #[inline]
    pub fn lock(&self) -> Shared<T> {
        match self.parts() {
            Some((ptr, block)) if block.try_acquire_shared() => {
                debug_assert!(block.payload_location().is_some());
                // SAFETY: the shared reference was just acquired for this handle
                unsafe { Shared::from_parts(ptr, block) }
            }
            _ => Shared::empty(),
        }
    }

    /// Like [`Weak::lock`], but returns `None` instead of an empty handle.
    #[inline]
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let shared = self.lock();
        if shared.is_empty() {
            None
        } else {
            Some(shared)
        }
    }

    /// Gets the number of owners of the observed block, `0` once expired or
    /// for an empty handle.
    #[inline]
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, BlockRef::shared_count)
    }

    /// Gets the number of weak handles observing the block, this one included.
    #[inline]
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.block.map_or(0, BlockRef::weak_count)
    }

    /// Returns `true` if both handles observe the same payload address.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Weak<T>) -> bool {
        match (self.ptr, other.ptr) {
            (Some(a), Some(b)) => core::ptr::addr_eq(a.as_ptr(), b.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }

    /// Converts this weak handle into one observing something reachable from
    /// the payload, such as a field or a trait object view. Returns `None`
    /// when the payload is already gone.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::{Shared, Weak};
    ///
    /// let owner = Shared::new((7, 'x'));
    /// let weak = Weak::observe(&owner).unwrap();
    /// let weak_char = weak.map(|pair| &pair.1).unwrap();
    /// assert_eq!(*weak_char.lock(), 'x');
    /// assert_eq!(weak.weak_count(), 2);
    /// ```
    pub fn map<U, F>(&self, f: F) -> Option<Weak<U>>
    where
        U: ?Sized,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let mapped = Shared::map(self.upgrade()?, f);
        Weak::observe(&mapped).ok()
    }

    /// Moves this handle out, leaving an empty one behind.
    #[inline]
    pub fn take(&mut self) -> Weak<T> {
        mem::replace(self, Weak::new())
    }

    /// Exchanges the observed blocks of two handles.
    #[inline]
    pub fn swap(&mut self, other: &mut Weak<T>) {
        mem::swap(self, other)
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.acquire_weak();
        }
        Weak {
            ptr: self.ptr,
            block: self.block,
        }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        let mut copy = source.clone();
        self.swap(&mut copy);
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block {
            // SAFETY: this handle owns one weak reference
            unsafe { block.release_weak() };
        }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    #[inline]
    fn default() -> Weak<T> {
        Weak::new()
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
