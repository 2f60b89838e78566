//! Control blocks.
//!
//! Every block starts with a [`BlockHeader`] holding the two counters and a
//! pointer to a static [`BlockVTable`]. Handles only ever see the header; the
//! concrete variant behind it is reached through the table.

use crate::{ucount, Allocator, Deleter, Error};
use branches::{assume, likely, unlikely};
use core::{
    cell::Cell,
    fmt,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

/// Operations a concrete block variant provides to the counting protocol.
pub(crate) struct BlockVTable {
    /// Tears the payload down. Called once, when the shared count reaches 0.
    destroy_payload: unsafe fn(NonNull<BlockHeader>),
    /// Address of the live payload, `None` once it was torn down.
    payload_location: unsafe fn(NonNull<BlockHeader>) -> Option<NonNull<u8>>,
    /// Frees the block itself. Called once, when both counts are 0.
    release_storage: unsafe fn(NonNull<BlockHeader>),
}

#[repr(C)]
pub(crate) struct BlockHeader {
    shared: Cell<ucount>,
    weak: Cell<ucount>,
    vtable: &'static BlockVTable,
}

impl BlockHeader {
    #[inline]
    fn new(vtable: &'static BlockVTable) -> Self {
        BlockHeader {
            shared: Cell::new(1),
            weak: Cell::new(0),
            vtable,
        }
    }
}

/// A copyable link to a control block. Copying it does not touch the counts;
/// the handles that hold it are responsible for that.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef(NonNull<BlockHeader>);

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

impl BlockRef {
    #[inline(always)]
    fn header(&self) -> &BlockHeader {
        // SAFETY: a block is released only after both counts reach zero, and
        // every handle holding a BlockRef contributes to one of them.
        unsafe { self.0.as_ref() }
    }

    #[inline]
    pub(crate) fn shared_count(self) -> usize {
        self.header().shared.get() as usize
    }

    #[inline]
    pub(crate) fn weak_count(self) -> usize {
        self.header().weak.get() as usize
    }

    #[inline]
    pub(crate) fn payload_location(self) -> Option<NonNull<u8>> {
        let vtable = self.header().vtable;
        // SAFETY: the block is alive, see `header`
        unsafe { (vtable.payload_location)(self.0) }
    }

    /// Adds an owner to a block that already has at least one.
    #[inline]
    pub(crate) fn acquire_shared(self) {
        let counter = &self.header().shared;
        let value = counter.get();
        unsafe { assume(value != 0) };
        let value = value.wrapping_add(1);
        if unlikely(value == 0) {
            panic!("reference counter overflow");
        }
        counter.set(value);
    }

    /// Adds an owner unless the payload was already torn down.
    #[inline]
    pub(crate) fn try_acquire_shared(self) -> bool {
        let counter = &self.header().shared;
        let value = counter.get();
        if value == 0 {
            return false;
        }
        let value = value.wrapping_add(1);
        if unlikely(value == 0) {
            panic!("reference counter overflow");
        }
        counter.set(value);
        true
    }

    #[inline]
    pub(crate) fn acquire_weak(self) {
        let counter = &self.header().weak;
        let value = counter.get().wrapping_add(1);
        if unlikely(value == 0) {
            panic!("reference counter overflow");
        }
        counter.set(value);
    }

    /// Drops one owner. The last owner tears the payload down and, when no
    /// weak handle remains, frees the block.
    ///
    /// # Safety
    ///
    /// The caller must own one shared reference and give it up.
    #[inline]
    pub(crate) unsafe fn release_shared(self) {
        let counter = &self.header().shared;
        let value = counter.get();
        assume(value != 0);
        if likely(value != 1) {
            counter.set(value - 1);
        } else {
            counter.set(0);
            self.destroy_slow();
        }
    }

    // The payload may own handles to this very block. Teardown therefore runs
    // under a temporary weak reference, so that dropping those handles cannot
    // free the block before teardown returns.
    unsafe fn destroy_slow(self) {
        trace!("tearing down payload of block {:?}", self);
        self.acquire_weak();
        let vtable = self.header().vtable;
        (vtable.destroy_payload)(self.0);
        self.release_weak();
    }

    /// Drops one weak reference, freeing the block if it was the last
    /// reference of any kind.
    ///
    /// # Safety
    ///
    /// The caller must own one weak reference and give it up.
    #[inline]
    pub(crate) unsafe fn release_weak(self) {
        let header = self.header();
        let value = header.weak.get();
        assume(value != 0);
        header.weak.set(value - 1);
        if value == 1 && header.shared.get() == 0 {
            let vtable = header.vtable;
            trace!("releasing storage of block {:?}", self);
            (vtable.release_storage)(self.0);
        }
    }
}

/// Block for an object that was constructed independently and is finalized
/// by a [`Deleter`]. The block itself lives in memory from `A`.
#[repr(C)]
pub(crate) struct SeparateBlock<T: ?Sized, D, A> {
    header: BlockHeader,
    ptr: Option<NonNull<T>>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T: ?Sized, D: Deleter<T>, A: Allocator> SeparateBlock<T, D, A> {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        destroy_payload: Self::destroy_payload,
        payload_location: Self::payload_location,
        release_storage: Self::release_storage,
    };

    /// Allocates a block adopting `ptr`. On failure the deleter is handed back
    /// untouched so the caller can decide what happens to the object.
    pub(crate) fn try_new(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<BlockRef, (Error, D)> {
        let mem = match alloc.allocate_for::<Self>() {
            Ok(mem) => mem,
            Err(_) => return Err((Error::alloc(core::alloc::Layout::new::<Self>()), deleter)),
        };
        // SAFETY: mem is valid for writes of Self
        unsafe {
            mem.as_ptr().write(SeparateBlock {
                header: BlockHeader::new(Self::VTABLE),
                ptr: Some(ptr),
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        trace!(
            "adopted {} into separate block {:p}",
            core::any::type_name::<T>(),
            mem
        );
        Ok(BlockRef(mem.cast()))
    }

    unsafe fn destroy_payload(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        if let Some(ptr) = (*this).ptr.take() {
            let deleter = ManuallyDrop::take(&mut (*this).deleter);
            deleter.delete(ptr);
        }
    }

    unsafe fn payload_location(block: NonNull<BlockHeader>) -> Option<NonNull<u8>> {
        let this = block.cast::<Self>().as_ptr();
        (*this).ptr.map(NonNull::cast)
    }

    unsafe fn release_storage(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>();
        let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
        alloc.deallocate_for(this);
    }
}

/// Block that stores the payload inline, right after the header and the
/// allocator, so that one allocation serves both.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T, A> {
    header: BlockHeader,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

// Frees reserved block memory if the payload constructor fails or unwinds.
struct Reservation<'a, U, A: Allocator> {
    alloc: &'a A,
    mem: NonNull<U>,
}

impl<U, A: Allocator> Drop for Reservation<'_, U, A> {
    fn drop(&mut self) {
        unsafe { self.alloc.deallocate_for(self.mem) }
    }
}

impl<T, A: Allocator> EmbeddedBlock<T, A> {
    const VTABLE: &'static BlockVTable = &BlockVTable {
        destroy_payload: Self::destroy_payload,
        payload_location: Self::payload_location,
        release_storage: Self::release_storage,
    };

    /// Allocates a block and constructs the payload directly in it. Errors
    /// from the allocator or the constructor leave nothing allocated.
    pub(crate) fn try_new_with<E, F>(alloc: A, init: F) -> Result<(BlockRef, NonNull<T>), E>
    where
        E: From<Error>,
        F: FnOnce() -> Result<T, E>,
    {
        let mem = alloc
            .allocate_for::<Self>()
            .map_err(|_| Error::alloc(core::alloc::Layout::new::<Self>()))?;
        let reservation = Reservation { alloc: &alloc, mem };
        // SAFETY: mem is valid for writes of Self; the field pointer is in bounds
        let value = unsafe { ptr::addr_of_mut!((*mem.as_ptr()).value).cast::<T>() };
        unsafe { value.write(init()?) };
        mem::forget(reservation);
        unsafe {
            ptr::addr_of_mut!((*mem.as_ptr()).header).write(BlockHeader::new(Self::VTABLE));
            ptr::addr_of_mut!((*mem.as_ptr()).alloc).write(ManuallyDrop::new(alloc));
        }
        trace!(
            "constructed {} in embedded block {:p}",
            core::any::type_name::<T>(),
            mem
        );
        // SAFETY: value points into a live allocation
        Ok((BlockRef(mem.cast()), unsafe { NonNull::new_unchecked(value) }))
    }

    unsafe fn destroy_payload(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>().as_ptr();
        ptr::drop_in_place(ptr::addr_of_mut!((*this).value).cast::<T>());
    }

    unsafe fn payload_location(block: NonNull<BlockHeader>) -> Option<NonNull<u8>> {
        let this = block.cast::<Self>().as_ptr();
        if (*block.as_ptr()).shared.get() == 0 {
            return None;
        }
        Some(NonNull::new_unchecked(ptr::addr_of_mut!((*this).value).cast::<u8>()))
    }

    unsafe fn release_storage(block: NonNull<BlockHeader>) {
        let this = block.cast::<Self>();
        let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
        alloc.deallocate_for(this);
    }
}
