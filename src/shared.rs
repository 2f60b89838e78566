use crate::{
    block::{BlockRef, EmbeddedBlock, SeparateBlock},
    Allocator, DefaultDelete, Deleter, Error, Global, Weak,
};
use alloc::boxed::Box;
use core::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

/// [`Shared<T>`] is an owning, single-threaded reference-counting handle.
///
/// A non-empty handle aliases a control block and holds a direct pointer to
/// the payload, so dereferencing never goes through the block. Cloning a
/// handle increments the block's shared count; dropping it decrements the
/// count, and the last owner tears the payload down. The block itself stays
/// allocated for as long as [`Weak`] handles observe it.
///
/// A handle can be *empty*: it then aliases nothing. Dereferencing an empty
/// handle panics; use [`Shared::get`] to probe, or the unchecked
/// [`Shared::get_unchecked`] where the check must not exist.
///
/// The counts are plain integers, so `Shared<T>` is neither `Send` nor
/// `Sync`.
///
/// ```
/// use rcblock::Shared;
///
/// let foo = Shared::new(vec![1.0, 2.0, 3.0]);
/// // The two syntaxes below are equivalent.
/// let a = foo.clone();
/// let b = Shared::clone(&foo);
/// assert_eq!(Shared::use_count(&foo), 3);
/// # drop((a, b));
/// ```
pub struct Shared<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    block: Option<BlockRef>,
    phantom: PhantomData<T>,
}

/// Allocates a block with `alloc` and moves `value` into it. The block and
/// the value share one allocation.
///
/// The allocator is stored in the block, whose lifetime is invisible in the
/// handle's type, hence the `'static` bound.
///
/// Panics via [`handle_alloc_error`][alloc::alloc::handle_alloc_error] when
/// the allocator fails.
#[inline]
pub fn allocate_shared<T, A: Allocator + 'static>(alloc: A, value: T) -> Shared<T> {
    allocate_shared_with(alloc, move || value)
}

/// Allocates a block with `alloc` and constructs the payload in it by calling
/// `init`. If `init` panics, the block is freed before unwinding continues.
///
/// # Examples
///
/// ```
/// use rcblock::{allocate_shared_with, Global};
///
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// let point = allocate_shared_with(Global, || Point { x: 1, y: 2 });
/// assert_eq!(point.x + point.y, 3);
/// ```
#[inline]
pub fn allocate_shared_with<T, A, F>(alloc: A, init: F) -> Shared<T>
where
    A: Allocator + 'static,
    F: FnOnce() -> T,
{
    match try_allocate_shared_with(alloc, || Ok::<T, Error>(init())) {
        Ok(shared) => shared,
        Err(err) => err.raise(),
    }
}

/// Fallible form of [`allocate_shared_with`]. Both allocation failures and
/// errors returned by `init` are propagated; nothing stays allocated in
/// either case.
///
/// # Examples
///
/// ```
/// use rcblock::{try_allocate_shared_with, Error, Global};
///
/// #[derive(Debug)]
/// enum Failure {
///     Parse,
///     Block(Error),
/// }
///
/// impl From<Error> for Failure {
///     fn from(err: Error) -> Self {
///         Failure::Block(err)
///     }
/// }
///
/// let parsed = try_allocate_shared_with(Global, || "12".parse::<u8>().map_err(|_| Failure::Parse));
/// assert_eq!(*parsed.unwrap(), 12);
/// let failed = try_allocate_shared_with(Global, || "x".parse::<u8>().map_err(|_| Failure::Parse));
/// assert!(matches!(failed, Err(Failure::Parse)));
/// ```
pub fn try_allocate_shared_with<T, A, E, F>(alloc: A, init: F) -> Result<Shared<T>, E>
where
    A: Allocator + 'static,
    E: From<Error>,
    F: FnOnce() -> Result<T, E>,
{
    let (block, ptr) = EmbeddedBlock::try_new_with(alloc, init)?;
    Ok(Shared {
        ptr: Some(ptr),
        block: Some(block),
        phantom: PhantomData,
    })
}

/// Places `value` in a block from the [`Global`] allocator.
#[inline]
pub fn make_shared<T>(value: T) -> Shared<T> {
    allocate_shared(Global, value)
}

/// Adopts an independently constructed object. `deleter` finalizes it once
/// the last owner is gone; `alloc` provides the storage of the block only.
///
/// A null `ptr` yields an empty handle, and `deleter` is dropped without
/// being called. Like the allocator, the deleter lives in the block and must
/// not borrow anything.
///
/// Panics via [`handle_alloc_error`][alloc::alloc::handle_alloc_error] when
/// the allocator fails, after handing `ptr` to `deleter`.
///
/// # Safety
///
/// `ptr` must be null or valid for reads for as long as the deleter has not
/// run, it must not be owned by anything else, and `deleter` must be able to
/// finalize it.
#[inline]
pub unsafe fn allocate_shared_from_pointer<T, D, A>(ptr: *mut T, deleter: D, alloc: A) -> Shared<T>
where
    T: ?Sized,
    D: Deleter<T> + 'static,
    A: Allocator + 'static,
{
    match try_allocate_shared_from_pointer(ptr, deleter, alloc) {
        Ok(shared) => shared,
        Err(err) => err.raise(),
    }
}

/// Fallible form of [`allocate_shared_from_pointer`]. If the block cannot
/// be allocated, the object is handed to `deleter` before the error is
/// returned, so it never leaks.
///
/// # Safety
///
/// Same contract as [`allocate_shared_from_pointer`].
pub unsafe fn try_allocate_shared_from_pointer<T, D, A>(
    ptr: *mut T,
    deleter: D,
    alloc: A,
) -> Result<Shared<T>, Error>
where
    T: ?Sized,
    D: Deleter<T> + 'static,
    A: Allocator + 'static,
{
    let ptr = match NonNull::new(ptr) {
        Some(ptr) => ptr,
        None => return Ok(Shared::empty()),
    };
    match SeparateBlock::try_new(ptr, deleter, alloc) {
        Ok(block) => Ok(Shared {
            ptr: Some(ptr),
            block: Some(block),
            phantom: PhantomData,
        }),
        Err((err, deleter)) => {
            deleter.delete(ptr);
            Err(err)
        }
    }
}

impl<T> Shared<T> {
    /// Constructs a new [`Shared<T>`] from the global allocator.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let tada = Shared::new("Tada!");
    /// ```
    #[inline]
    pub fn new(value: T) -> Shared<T> {
        make_shared(value)
    }

    /// Constructs a new [`Shared<T>`], returning an error if the block cannot
    /// be allocated.
    #[inline]
    pub fn try_new(value: T) -> Result<Shared<T>, Error> {
        try_allocate_shared_with(Global, move || Ok(value))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Creates an empty handle that aliases no block.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let empty = Shared::<str>::empty();
    /// assert!(empty.is_empty());
    /// assert_eq!(Shared::use_count(&empty), 0);
    /// ```
    #[inline]
    pub const fn empty() -> Shared<T> {
        Shared {
            ptr: None,
            block: None,
            phantom: PhantomData,
        }
    }

    /// Adopts a boxed value through a separate block, keeping the box's
    /// allocation for the payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    /// use std::fmt::Display;
    ///
    /// let boxed: Box<dyn Display> = Box::new(5);
    /// let shared = Shared::from_box(boxed);
    /// assert_eq!(shared.to_string(), "5");
    /// ```
    #[inline]
    pub fn from_box(value: Box<T>) -> Shared<T> {
        // SAFETY: a box pointer is valid and uniquely owned, and DefaultDelete
        // turns it back into a box
        unsafe { allocate_shared_from_pointer(Box::into_raw(value), DefaultDelete, Global) }
    }

    // Takes over one shared reference already accounted for in `block`.
    #[inline]
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, block: BlockRef) -> Shared<T> {
        Shared {
            ptr: Some(ptr),
            block: Some(block),
            phantom: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn parts(&self) -> Option<(NonNull<T>, BlockRef)> {
        match (self.ptr, self.block) {
            (Some(ptr), Some(block)) => Some((ptr, block)),
            _ => None,
        }
    }

    /// Creates a new owner from a weak handle without checking liveness.
    ///
    /// Prefer [`Weak::lock`], which returns an empty handle when the payload
    /// is gone.
    ///
    /// # Safety
    ///
    /// `weak` must be non-empty and not [expired][Weak::expired].
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::{Shared, Weak};
    ///
    /// let owner = Shared::new(3);
    /// let weak = Weak::observe(&owner).unwrap();
    /// assert!(!weak.expired());
    /// let second = unsafe { Shared::from_weak_unchecked(&weak) };
    /// assert_eq!(Shared::use_count(&second), 2);
    /// ```
    #[inline]
    pub unsafe fn from_weak_unchecked(weak: &Weak<T>) -> Shared<T> {
        let (ptr, block) = weak.parts().unwrap_unchecked();
        debug_assert!(block.payload_location().is_some());
        block.acquire_shared();
        Shared::from_parts(ptr, block)
    }

    /// Returns `true` if this handle aliases no block.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Returns a reference to the payload, or `None` for an empty handle.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a non-empty handle keeps the payload alive
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Returns a reference to the payload without checking for emptiness.
    ///
    /// # Safety
    ///
    /// The handle must not be empty.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self) -> &T {
        &*self.ptr.unwrap_unchecked().as_ptr()
    }

    /// Gives you a pointer to the payload. The pointer stays valid as long as
    /// there are owners of the block.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let x = Shared::new("hello".to_owned());
    /// let y = Shared::clone(&x);
    /// let x_ptr = Shared::as_ptr(&x).unwrap();
    /// assert_eq!(x_ptr, Shared::as_ptr(&y).unwrap());
    /// assert_eq!(unsafe { x_ptr.as_ref() }, "hello");
    /// ```
    #[inline]
    #[must_use]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// Gets the number of owners of the aliased block, `0` for an empty
    /// handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let five = Shared::new(5);
    /// let _also_five = Shared::clone(&five);
    /// assert_eq!(2, Shared::use_count(&five));
    /// ```
    #[inline]
    #[must_use]
    pub fn use_count(this: &Self) -> usize {
        this.block.map_or(0, BlockRef::shared_count)
    }

    /// Gets the number of weak handles observing the aliased block.
    #[inline]
    #[must_use]
    pub fn weak_count(this: &Self) -> usize {
        this.block.map_or(0, BlockRef::weak_count)
    }

    /// Returns `true` if both handles point at the same payload address.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let five = Shared::new(5);
    /// let same_five = Shared::clone(&five);
    /// let other_five = Shared::new(5);
    ///
    /// assert!(Shared::ptr_eq(&five, &same_five));
    /// assert!(!Shared::ptr_eq(&five, &other_five));
    /// ```
    #[inline]
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.ptr, other.ptr) {
            (Some(a), Some(b)) => ptr::addr_eq(a.as_ptr(), b.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns `true` if both handles share a control block, even when they
    /// point at different parts of it (see [`Shared::map`]).
    #[inline]
    #[must_use]
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &Shared<U>) -> bool {
        this.block == other.block
    }

    /// Creates a weak handle observing this handle's block.
    ///
    /// Fails with [`Error::EmptyHandle`] for an empty handle.
    #[inline]
    pub fn downgrade(this: &Self) -> Result<Weak<T>, Error> {
        Weak::observe(this)
    }

    /// Returns a mutable reference to the payload when this handle is the only
    /// owner and no weak handle observes the block.
    ///
    /// A handle produced by [`Shared::map`] that points anywhere but the start
    /// of the block's own payload always yields `None`: the target may be
    /// memory the payload merely borrows.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let mut x = Shared::new(3);
    /// *Shared::get_mut(&mut x).unwrap() = 4;
    /// assert_eq!(*x, 4);
    ///
    /// let _y = Shared::clone(&x);
    /// assert!(Shared::get_mut(&mut x).is_none());
    /// ```
    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let (ptr, block) = this.parts()?;
        if block.shared_count() == 1
            && block.weak_count() == 0
            && block.payload_location() == Some(ptr.cast::<u8>())
        {
            // SAFETY: nobody else can reach the payload, and `ptr` is the
            // payload itself rather than something it refers to
            Some(unsafe { &mut *ptr.as_ptr() })
        } else {
            None
        }
    }

    /// Turns this handle into one that points at something reachable from the
    /// payload, sharing the same block. This is how handles convert to trait
    /// objects or project onto a field.
    ///
    /// Mapping an empty handle yields an empty handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    /// use std::fmt::Debug;
    ///
    /// let pair = Shared::new((1, "one"));
    /// let name = Shared::map(pair.clone(), |pair| &pair.1);
    /// assert_eq!(*name, "one");
    /// assert!(Shared::owner_eq(&pair, &name));
    ///
    /// let debug: Shared<dyn Debug> = Shared::map(pair, |pair| pair as &dyn Debug);
    /// assert_eq!(format!("{:?}", debug), "(1, \"one\")");
    /// ```
    pub fn map<U, F>(this: Self, f: F) -> Shared<U>
    where
        U: ?Sized,
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let (ptr, block) = match this.parts() {
            Some(parts) => parts,
            None => return Shared::empty(),
        };
        // SAFETY: `this` still owns the block while `f` runs
        let target = NonNull::from(f(unsafe { &*ptr.as_ptr() }));
        mem::forget(this);
        // SAFETY: the shared reference held by `this` moves to the new handle
        unsafe { Shared::from_parts(target, block) }
    }

    /// Moves the ownership out of this handle, leaving it empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::Shared;
    ///
    /// let mut source = Shared::new(1);
    /// let target = source.take();
    /// assert!(source.is_empty());
    /// assert_eq!(Shared::use_count(&target), 1);
    /// ```
    #[inline]
    pub fn take(&mut self) -> Shared<T> {
        mem::replace(self, Shared::empty())
    }

    /// Exchanges the blocks and payload pointers of two handles.
    #[inline]
    pub fn swap(&mut self, other: &mut Shared<T>) {
        mem::swap(self, other)
    }

    /// Releases this handle's ownership, leaving it empty.
    #[inline]
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Replaces the payload with a freshly adopted box. The new block is fully
    /// built before the old ownership is released.
    #[inline]
    pub fn reset_box(&mut self, value: Box<T>) {
        let mut fresh = Shared::from_box(value);
        self.swap(&mut fresh);
    }

    /// Replaces the payload with an object adopted through
    /// [`allocate_shared_from_pointer`]. A null `ptr` leaves the handle empty.
    ///
    /// The new block is built before the old ownership is released.
    ///
    /// # Safety
    ///
    /// Same contract as [`allocate_shared_from_pointer`].
    ///
    /// # Examples
    ///
    /// ```
    /// use rcblock::{DefaultDelete, Global, Shared};
    ///
    /// let mut handle = Shared::new(1);
    /// let raw = Box::into_raw(Box::new(2));
    /// unsafe { handle.reset_from_pointer(raw, DefaultDelete, Global) };
    /// assert_eq!(*handle, 2);
    /// ```
    #[inline]
    pub unsafe fn reset_from_pointer<D, A>(&mut self, ptr: *mut T, deleter: D, alloc: A)
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let mut fresh = allocate_shared_from_pointer(ptr, deleter, alloc);
        self.swap(&mut fresh);
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn empty_deref() -> ! {
    panic!("dereferenced an empty Shared handle")
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline(always)]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.ptr {
            // SAFETY: a non-empty handle keeps the payload alive
            Some(ptr) => unsafe { &*ptr.as_ptr() },
            None => empty_deref(),
        }
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.acquire_shared();
        }
        Shared {
            ptr: self.ptr,
            block: self.block,
            phantom: PhantomData,
        }
    }

    // Builds the copy first and swaps it in, so a failing copy leaves `self`
    // untouched.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        let mut copy = source.clone();
        self.swap(&mut copy);
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block {
            // SAFETY: this handle owns one shared reference
            unsafe { block.release_shared() };
        }
    }
}

impl<T: ?Sized> Default for Shared<T> {
    /// Creates an empty handle.
    #[inline]
    fn default() -> Shared<T> {
        Shared::empty()
    }
}

impl<T> From<T> for Shared<T> {
    #[inline(always)]
    fn from(value: T) -> Self {
        Shared::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    #[inline]
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<T: ?Sized + Hash> Hash for Shared<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `Borrow<T>`: hash exactly what the payload hashes.
        if let Some(value) = self.get() {
            value.hash(state);
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = self.ptr.map_or(ptr::null(), |ptr| ptr.as_ptr() as *const ());
        fmt::Pointer::fmt(&ptr, f)
    }
}

/// Handles compare by payload; an empty handle equals only another empty
/// handle.
impl<T: ?Sized + PartialEq> PartialEq for Shared<T> {
    #[inline]
    fn eq(&self, other: &Shared<T>) -> bool {
        self.get() == other.get()
    }
}

impl<T: ?Sized + Eq> Eq for Shared<T> {}

/// Empty handles order before non-empty ones.
impl<T: ?Sized + PartialOrd> PartialOrd for Shared<T> {
    #[inline]
    fn partial_cmp(&self, other: &Shared<T>) -> Option<core::cmp::Ordering> {
        self.get().partial_cmp(&other.get())
    }
}

impl<T: ?Sized + Ord> Ord for Shared<T> {
    #[inline]
    fn cmp(&self, other: &Shared<T>) -> core::cmp::Ordering {
        self.get().cmp(&other.get())
    }
}

impl<T: ?Sized> Borrow<T> for Shared<T> {
    #[inline(always)]
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    #[inline(always)]
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized> Unpin for Shared<T> {}
