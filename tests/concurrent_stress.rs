//! Cross-thread stress tests for the pool and the thread manager

use core::alloc::Layout;
use core::sync::atomic::{AtomicU64, Ordering};

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use taskforge::allocator::{Allocator, FixedArrayResource, SystemAllocator};
use taskforge::executor::{TaskFuture, ThreadManager, WaitableAtomic};
use taskforge::ResourceArc;

fn upstream() -> ResourceArc {
    Arc::new(SystemAllocator::new())
}

fn manager(threads: usize) -> ThreadManager {
    ThreadManager::with_threads(threads, upstream()).unwrap()
}

/// Blocks `count` workers on a gate so the queue state is fully under
/// test control; returns the gate and the blocker futures.
fn block_workers(
    manager: &ThreadManager,
    count: usize,
) -> (Arc<WaitableAtomic>, Vec<TaskFuture<()>>) {
    let gate = Arc::new(WaitableAtomic::new(0));
    let blockers = (0..count)
        .map(|_| {
            let gate = Arc::clone(&gate);
            manager
                .enqueue(
                    move || {
                        gate.wait(0);
                    },
                    false,
                )
                .unwrap()
        })
        .collect();
    // Give every worker time to pick up its blocker.
    while manager.size() != 0 {
        thread::yield_now();
    }
    (gate, blockers)
}

fn open_gate(gate: &WaitableAtomic) {
    gate.store(1, Ordering::Release);
    gate.notify_all();
}

#[test]
fn pool_four_way_contention() {
    const ITERATIONS: u64 = 100_000;

    let pool = Arc::new(FixedArrayResource::<u64>::with_capacity(4, upstream()).unwrap());
    let layout = Layout::new::<u64>();

    let workers: Vec<_> = (0..4u64)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    let ptr = unsafe { pool.allocate(layout) }.expect("pool allocation failed");
                    let slot = ptr.as_ptr() as *mut u64;
                    let marker = thread_index * ITERATIONS + i;
                    unsafe {
                        slot.write(marker);
                        // A torn read here would mean two threads own
                        // the same slot at once.
                        assert_eq!(slot.read(), marker);
                        pool.deallocate(ptr.cast(), layout);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(pool.count(), 0);
}

#[test]
fn parallel_sum_over_loop_task() {
    let manager = manager(4);
    manager.set_capacity(16 * 1024);

    let counter = Arc::new(AtomicU64::new(0));
    let future = {
        let counter = Arc::clone(&counter);
        manager
            .enqueue_loop(
                0..10_000usize,
                move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                },
                false,
            )
            .unwrap()
    };

    future.get().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 10_000);

    manager.wait_for_completion();
    assert_eq!(manager.size(), 0);
}

#[test]
fn precedence_chain_runs_in_id_order() {
    const TASKS: i64 = 1000;
    const WORKERS: usize = 4;

    let manager = manager(WORKERS);
    // Parked workers keep the early IDs incomplete, so the ID space
    // cannot recycle while the chain is being enqueued.
    let (gate, blockers) = block_workers(&manager, WORKERS);

    let order = Arc::new(Mutex::new(Vec::with_capacity(TASKS as usize)));
    let futures: Vec<_> = (0..TASKS)
        .map(|k| {
            let order = Arc::clone(&order);
            // With the workers parked, task IDs are issued densely
            // after the blockers.
            let expected_id = WORKERS as i64 + k;
            let future = manager
                .enqueue(
                    move || {
                        order.lock().unwrap().push(expected_id);
                    },
                    true,
                )
                .unwrap();
            assert_eq!(future.id(), expected_id);
            future
        })
        .collect();

    open_gate(&gate);
    for blocker in blockers {
        blocker.get().unwrap();
    }
    for future in futures {
        future.get().unwrap();
    }
    manager.wait_for_completion();
    assert_eq!(manager.size(), 0);

    let order = order.lock().unwrap();
    let expected: Vec<i64> = (WORKERS as i64..WORKERS as i64 + TASKS).collect();
    assert_eq!(*order, expected);
}

#[test]
fn worker_ids_are_dense() {
    const WORKERS: usize = 4;

    let manager = manager(WORKERS);
    let barrier = Arc::new(Barrier::new(WORKERS + 1));
    let futures: Vec<_> = (0..WORKERS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            manager
                .enqueue_with_id(
                    move |thread_id| {
                        barrier.wait();
                        thread_id
                    },
                    false,
                )
                .unwrap()
        })
        .collect();

    // Each worker holds one task at the barrier, so the recorded IDs
    // come from distinct workers.
    barrier.wait();
    let mut ids: Vec<i64> = futures.into_iter().map(|f| f.get().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..WORKERS as i64).collect::<Vec<_>>());

    assert_eq!(manager.current_thread_id(), ThreadManager::UNMANAGED_THREAD_ID);
}

#[test]
fn overflow_recovery_completes_every_iteration() {
    const ITERATIONS: usize = 100;
    const WORKERS: usize = 2;

    let manager = manager(WORKERS);
    manager.set_capacity(16);
    let (gate, blockers) = block_workers(&manager, WORKERS);

    let hits = Arc::new(Mutex::new(vec![0u32; ITERATIONS]));
    let error = {
        let hits = Arc::clone(&hits);
        manager
            .enqueue_loop(
                0..ITERATIONS,
                move |index| {
                    hits.lock().unwrap()[index] += 1;
                },
                false,
            )
            .unwrap_err()
    };

    let mut overflow = error.into_overflow().expect("expected a queue overflow");
    assert_eq!(overflow.begin_offset(), 16);
    assert_eq!(overflow.num_of_iterations(), ITERATIONS as i64);

    let future: TaskFuture<()> = overflow.take_future().expect("future is carried by the error");

    // Finish the unqueued tail inline, then let the workers drain the
    // queued head.
    overflow.run_remaining(ThreadManager::UNMANAGED_THREAD_ID);
    open_gate(&gate);
    for blocker in blockers {
        blocker.get().unwrap();
    }
    drop(overflow);

    future.get().unwrap();
    let hits = hits.lock().unwrap();
    assert!(hits.iter().all(|&count| count == 1), "every iteration runs exactly once");
}
