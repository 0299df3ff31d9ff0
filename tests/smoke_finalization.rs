use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use weakgc::{Gc, Heap, HeapConfig, WeakHandle};

fn manual_heap() -> Heap {
    let _ = env_logger::builder().is_test(true).try_init();
    Heap::with_config(HeapConfig::default().with_collection_threshold(None)).unwrap()
}

#[test]
fn finalizers_run_exactly_once() {
    let heap = manual_heap();
    let runs = Arc::new(AtomicUsize::new(0));

    let object = heap.alloc(String::from("resource"));
    for _ in 0..3 {
        let runs = Arc::clone(&runs);
        Gc::on_finalize(&object, move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }
    drop(object);

    let cycle = heap.collect().unwrap();
    assert_eq!(cycle.finalizers_run, 3);
    heap.collect().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn weak_slot_is_cleared_before_user_finalizers_run() {
    let heap = manual_heap();
    let saw_dead_handle = Arc::new(AtomicBool::new(false));
    let handle_cell: Arc<Mutex<Option<WeakHandle<Vec<u8>>>>> = Arc::new(Mutex::new(None));

    let object = heap.alloc(vec![0u8; 16]);
    // Registered before the weak slot exists.
    {
        let handle_cell = Arc::clone(&handle_cell);
        let saw_dead_handle = Arc::clone(&saw_dead_handle);
        Gc::on_finalize(&object, move || {
            if let Some(weak) = handle_cell.lock().unwrap().take() {
                saw_dead_handle.store(
                    !weak.is_alive() && weak.upgrade().is_none(),
                    Ordering::SeqCst,
                );
            }
        });
    }
    *handle_cell.lock().unwrap() = Some(WeakHandle::new(&object));
    let weak = WeakHandle::new(&object);
    drop(object);

    heap.collect().unwrap();
    assert!(saw_dead_handle.load(Ordering::SeqCst));
    assert!(!weak.is_alive());
}

#[test]
fn finalizers_of_rooted_objects_do_not_run() {
    let heap = manual_heap();
    let ran = Arc::new(AtomicBool::new(false));

    let object = heap.alloc(5u64);
    {
        let ran = Arc::clone(&ran);
        Gc::on_finalize(&object, move || ran.store(true, Ordering::SeqCst));
    }

    heap.collect().unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    drop(object);
}

#[test]
fn panicking_finalizer_does_not_stop_the_finalizer_thread() {
    let heap = manual_heap();
    let later = Arc::new(AtomicBool::new(false));

    let doomed = heap.alloc(1u8);
    Gc::on_finalize(&doomed, || panic!("finalizer failure"));
    {
        let later = Arc::clone(&later);
        Gc::on_finalize(&doomed, move || later.store(true, Ordering::SeqCst));
    }
    let weak = WeakHandle::new(&doomed);
    drop(doomed);

    let cycle = heap.collect().unwrap();
    assert_eq!(cycle.reclaimed, 1);
    assert!(later.load(Ordering::SeqCst));
    assert!(!weak.is_alive());

    let next = heap.alloc(2u8);
    let next_weak = WeakHandle::new(&next);
    drop(next);
    heap.collect().unwrap();
    assert!(!next_weak.is_alive());
}

#[test]
fn finalizers_may_allocate_on_the_heap() {
    let heap = Arc::new(
        Heap::with_config(HeapConfig::default().with_collection_threshold(Some(1))).unwrap(),
    );
    let allocated = Arc::new(AtomicBool::new(false));

    let object = heap.alloc(0u32);
    {
        let heap_ref = Arc::clone(&heap);
        let allocated = Arc::clone(&allocated);
        Gc::on_finalize(&object, move || {
            // Threshold collection is skipped on the finalizer thread.
            drop(heap_ref.alloc(1u32));
            allocated.store(true, Ordering::SeqCst);
        });
    }
    drop(object);

    heap.collect().unwrap();
    assert!(allocated.load(Ordering::SeqCst));
    assert_eq!(heap.live_objects(), 1);

    heap.collect().unwrap();
    assert_eq!(heap.live_objects(), 0);
}

#[test]
fn finalizers_releasing_roots_make_objects_collectable_next_cycle() {
    let heap = manual_heap();
    let inner = heap.alloc(String::from("inner"));
    let inner_weak = WeakHandle::new(&inner);

    let outer = heap.alloc(String::from("outer"));
    Gc::on_finalize(&outer, move || drop(inner));
    drop(outer);

    heap.collect().unwrap();
    assert!(inner_weak.is_alive());

    heap.collect().unwrap();
    assert!(!inner_weak.is_alive());
}
