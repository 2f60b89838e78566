#![allow(dead_code)]

use rcblock::{AllocError, Allocator, Global};
use std::{alloc::Layout, cell::Cell, ptr::NonNull, rc::Rc};

/// Allocator that forwards to [`Global`] and records every call.
#[derive(Clone, Default)]
pub struct CountingAlloc {
    allocations: Rc<Cell<usize>>,
    deallocations: Rc<Cell<usize>>,
}

impl CountingAlloc {
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    pub fn live(&self) -> usize {
        self.allocations() - self.deallocations()
    }
}

unsafe impl Allocator for CountingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocations.set(self.allocations.get() + 1);
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.set(self.deallocations.get() + 1);
        Global.deallocate(ptr, layout)
    }
}

/// Allocator that refuses every request.
#[derive(Clone, Copy, Default)]
pub struct FailingAlloc;

unsafe impl Allocator for FailingAlloc {
    fn allocate(&self, _layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("nothing was allocated")
    }
}

/// Payload that counts how many times it was dropped.
#[derive(Debug)]
pub struct Widget {
    pub value: i32,
    drops: Rc<Cell<usize>>,
}

impl Widget {
    pub fn new(value: i32, drops: &Rc<Cell<usize>>) -> Widget {
        Widget {
            value,
            drops: drops.clone(),
        }
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

pub fn drop_counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}
