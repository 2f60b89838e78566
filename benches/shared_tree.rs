use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rcblock::{allocate_shared, AllocError, Allocator, Shared, Weak};
use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::RefCell,
    ptr::NonNull,
    rc::{Rc as StdRc, Weak as StdWeak},
};

const DEPTH: u32 = 16;

// Bypasses the global allocator so blocks go through a non-default capability.
#[derive(Clone, Copy)]
struct SystemAlloc;

unsafe impl Allocator for SystemAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        NonNull::new(unsafe { System.alloc(layout) }).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        System.dealloc(ptr.as_ptr(), layout)
    }
}

struct Node {
    value: u32,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<Shared<Node>>>,
}

fn build(depth: u32, leaves: &mut Vec<Shared<Node>>) -> Shared<Node> {
    let node = allocate_shared(
        SystemAlloc,
        Node {
            value: depth,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        },
    );
    if depth == 0 {
        leaves.push(node.clone());
        return node;
    }
    for _ in 0..2 {
        let child = build(depth - 1, leaves);
        *child.parent.borrow_mut() = Weak::observe(&node).unwrap();
        node.children.borrow_mut().push(child);
    }
    node
}

fn climb(leaf: &Shared<Node>) -> u32 {
    let mut sum = leaf.value;
    let mut current = leaf.parent.borrow().lock();
    while let Some(node) = current.get() {
        sum += node.value;
        let next = node.parent.borrow().lock();
        current = next;
    }
    sum
}

struct StdNode {
    value: u32,
    parent: RefCell<StdWeak<StdNode>>,
    children: RefCell<Vec<StdRc<StdNode>>>,
}

fn build_std(depth: u32, leaves: &mut Vec<StdRc<StdNode>>) -> StdRc<StdNode> {
    let node = StdRc::new(StdNode {
        value: depth,
        parent: RefCell::new(StdWeak::new()),
        children: RefCell::new(Vec::new()),
    });
    if depth == 0 {
        leaves.push(node.clone());
        return node;
    }
    for _ in 0..2 {
        let child = build_std(depth - 1, leaves);
        *child.parent.borrow_mut() = StdRc::downgrade(&node);
        node.children.borrow_mut().push(child);
    }
    node
}

fn climb_std(leaf: &StdRc<StdNode>) -> u32 {
    let mut sum = leaf.value;
    let mut current = leaf.parent.borrow().upgrade();
    while let Some(node) = current {
        sum += node.value;
        current = node.parent.borrow().upgrade();
    }
    sum
}

fn build_benchmark(c: &mut Criterion) {
    c.bench_function("parent-linked tree build rcblock", |b| {
        b.iter(|| {
            let mut leaves = Vec::new();
            black_box(build(black_box(12), &mut leaves))
        })
    });
    c.bench_function("parent-linked tree build std::rc", |b| {
        b.iter(|| {
            let mut leaves = Vec::new();
            black_box(build_std(black_box(12), &mut leaves))
        })
    });
}

fn climb_benchmark(c: &mut Criterion) {
    let mut leaves = Vec::new();
    let _root = build(DEPTH, &mut leaves);
    c.bench_function("leaf-to-root lock rcblock", |b| {
        b.iter(|| leaves.iter().map(climb).sum::<u32>())
    });

    let mut std_leaves = Vec::new();
    let _std_root = build_std(DEPTH, &mut std_leaves);
    c.bench_function("leaf-to-root upgrade std::rc", |b| {
        b.iter(|| std_leaves.iter().map(climb_std).sum::<u32>())
    });
}

criterion_group!(benches, build_benchmark, climb_benchmark);
criterion_main!(benches);
