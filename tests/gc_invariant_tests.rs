//! Property-based tests for weak handle invariants
//!
//! A single-threaded model tracks how many roots each object has; after
//! every step the weak handles must agree with it.

use proptest::prelude::*;

use weakgc::{Gc, Heap, HeapConfig, WeakHandle};

#[derive(Debug, Clone)]
enum Op {
    Alloc(u32),
    DropRoot(usize),
    Upgrade(usize),
    Collect,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u32>().prop_map(Op::Alloc),
        3 => any::<usize>().prop_map(Op::DropRoot),
        2 => any::<usize>().prop_map(Op::Upgrade),
        2 => Just(Op::Collect),
    ]
}

struct Tracked {
    value: u32,
    weak: WeakHandle<u32>,
    roots: Vec<Gc<u32>>,
    collected: bool,
}

proptest! {
    /// Invariant: a handle is alive exactly until a cycle finds its target
    /// unrooted, and never comes back.
    #[test]
    fn weak_handles_follow_reachability(ops in prop::collection::vec(arb_op(), 1..64)) {
        let heap = Heap::with_config(HeapConfig::default().with_collection_threshold(None)).unwrap();
        let mut tracked: Vec<Tracked> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(value) => {
                    let gc = heap.alloc(value);
                    tracked.push(Tracked {
                        value,
                        weak: WeakHandle::new(&gc),
                        roots: vec![gc],
                        collected: false,
                    });
                }
                Op::DropRoot(i) if !tracked.is_empty() => {
                    let len = tracked.len();
                    tracked[i % len].roots.pop();
                }
                Op::Upgrade(i) if !tracked.is_empty() => {
                    let len = tracked.len();
                    let entry = &mut tracked[i % len];
                    match entry.weak.upgrade() {
                        Some(gc) => {
                            prop_assert!(!entry.collected);
                            prop_assert_eq!(*gc, entry.value);
                            entry.roots.push(gc);
                        }
                        None => prop_assert!(entry.collected),
                    }
                }
                Op::Collect => {
                    heap.collect().unwrap();
                    for entry in &mut tracked {
                        if entry.roots.is_empty() {
                            entry.collected = true;
                        }
                    }
                }
                _ => {}
            }

            for entry in &tracked {
                prop_assert_eq!(entry.weak.is_alive(), !entry.collected);
            }
            let live = tracked.iter().filter(|entry| !entry.collected).count();
            prop_assert_eq!(heap.live_objects(), live);
        }
    }

    /// Invariant: every root taken from a handle is the handle's target.
    #[test]
    fn upgrades_preserve_identity(values in prop::collection::vec(any::<u64>(), 1..16)) {
        let heap = Heap::with_config(HeapConfig::default().with_collection_threshold(None)).unwrap();
        let roots: Vec<_> = values.iter().map(|&v| heap.alloc(v)).collect();
        let handles: Vec<_> = roots.iter().map(Gc::downgrade).collect();

        for (root, weak) in roots.iter().zip(&handles) {
            let upgraded = weak.upgrade().unwrap();
            prop_assert!(Gc::ptr_eq(root, &upgraded));
        }
    }
}
