//! Task-parallel and data-parallel thread pool
//!
//! The manager owns a set of worker threads and one MPMC task queue.
//! Callers submit a callable and get back a future; workers pull one
//! worker item per scheduled invocation, honor precedence constraints
//! between task IDs and deliver results through the future.
//!
//! Task objects are allocated from a per-task-ID monotonic arena when
//! they fit, falling back to the upstream resource. Task IDs double as
//! indices into a fixed-size completion bitset; IDs recycle once every
//! prior task has completed or the bitset capacity is reached.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicI64, Ordering};

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::allocator::{Allocator, MonotonicResource, ResourceArc};
use crate::bitset::{AtomicBitset, CHUNK_ALIGNMENT};
use crate::error::{AllocError, AllocResult};
use crate::executor::future::TaskFuture;
use crate::executor::task::{
    LoopTask, PackagedTask, SharedTask, SingleTask, TaskBox, WorkerItem, encode_info,
};
use crate::executor::wait::WaitableAtomic;

/// `num_tasks` sentinel while workers are being created
const CREATING: i64 = -2;
/// `num_tasks` sentinel observed by workers on shutdown
const SHUTTING_DOWN: i64 = -1;

/// Maximum alignment for task objects and return values
const ALIGNMENT_MAX: usize = CHUNK_ALIGNMENT;
/// Capacity of one per-task-ID arena
const TASK_STORAGE_SIZE: usize = 8 * CHUNK_ALIGNMENT;
/// Bits in the completion bitset; also the number of issued IDs per
/// generation and the number of per-ID arenas
const TASK_STATUS_SIZE: usize = 4 * AtomicBitset::CHUNK_BITS;

/// Allocation attempts per task; later attempts get fresh IDs whose
/// arenas may have been released by completed tasks
const ALLOC_ATTEMPTS: usize = 4;

const DEFAULT_CAPACITY: usize = 1024;

// The hot atomics must each sit alone on a 2-line padding unit, the
// same unit the bitset uses for its chunks.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const _: () = assert!(core::mem::align_of::<CachePadded<AtomicI64>>() == CHUNK_ALIGNMENT);
const _: () = assert!(TASK_STORAGE_SIZE % ALIGNMENT_MAX == 0);

/// Queue overflow payload: everything the caller needs to finish the
/// unqueued portion inline or resubmit it
pub struct OverflowError {
    task: SharedTask,
    begin_offset: i64,
    num_of_iterations: i64,
    future: Option<Box<dyn Any + Send>>,
}

impl OverflowError {
    /// Returns the first iteration offset that was not enqueued
    #[inline]
    pub fn begin_offset(&self) -> i64 {
        self.begin_offset
    }

    /// Returns the total number of iterations of the task
    #[inline]
    pub fn num_of_iterations(&self) -> i64 {
        self.num_of_iterations
    }

    /// Returns the underlying shared task
    #[inline]
    pub fn task(&self) -> &dyn PackagedTask {
        &**self.task
    }

    /// Extracts the future of the overflowed task
    ///
    /// The result type must match the enqueue call that overflowed:
    /// `()` for loops, the payload's return type for single tasks. This
    /// is the one type-recovery site on the erased task.
    pub fn take_future<T: Send + 'static>(&mut self) -> Option<TaskFuture<T>> {
        let boxed = self.future.take()?;
        match boxed.downcast::<TaskFuture<T>>() {
            Ok(future) => Some(*future),
            Err(other) => {
                self.future = Some(other);
                None
            }
        }
    }

    /// Runs every unqueued iteration on the calling thread
    pub fn run_remaining(&self, thread_id: i64) {
        for offset in self.begin_offset..self.num_of_iterations {
            self.task.run(thread_id, offset);
        }
    }
}

impl core::fmt::Debug for OverflowError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OverflowError")
            .field("task_id", &self.task.id())
            .field("begin_offset", &self.begin_offset)
            .field("num_of_iterations", &self.num_of_iterations)
            .finish()
    }
}

/// Failure of an enqueue operation
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// No memory resource could hold the task object
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// The task queue was full; the payload carries the pending work
    #[error("the task queue overflowed")]
    Overflow(OverflowError),
}

impl EnqueueError {
    /// Extracts the overflow payload, if any
    pub fn into_overflow(self) -> Option<OverflowError> {
        match self {
            Self::Overflow(overflow) => Some(overflow),
            Self::Alloc(_) => None,
        }
    }
}

/// Shared manager state reachable from workers and in-flight tasks
///
/// The manager outlives both: workers are joined and the queue drained
/// before the owning handle releases its reference.
pub(crate) struct ManagerCore {
    task_id_count: CachePadded<AtomicI64>,
    num_tasks: CachePadded<WaitableAtomic>,
    num_active_workers: CachePadded<AtomicI64>,
    queue: RwLock<ArrayQueue<WorkerItem>>,
    task_status: AtomicBitset,
    worker_ids: OnceLock<HashMap<ThreadId, i64>>,
    task_storage: Vec<Arc<MonotonicResource>>,
    upstream: ResourceArc,
}

impl ManagerCore {
    /// Dense worker ID of the calling thread, or the unmanaged sentinel
    fn current_thread_id(&self) -> i64 {
        self.worker_ids
            .get()
            .and_then(|ids| ids.get(&thread::current().id()).copied())
            .unwrap_or(ThreadManager::UNMANAGED_THREAD_ID)
    }

    /// Workers run while the task count is non-negative
    #[inline]
    fn workers_enabled(&self) -> bool {
        self.num_tasks.load(Ordering::Acquire) >= 0
    }

    /// Pops one item and claims it against the task count
    fn fetch_item(&self) -> Option<WorkerItem> {
        let item = self.queue.read().pop();
        if item.is_some() {
            self.num_tasks.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    fn drain_queue(&self) {
        let queue = self.queue.read();
        while queue.pop().is_some() {}
    }

    /// Spins until the queue is empty and every worker is idle
    fn wait_for_completion(&self) {
        if !self.workers_enabled() {
            return;
        }
        while !self.queue.read().is_empty()
            || self.num_active_workers.load(Ordering::Acquire) != 0
        {
            thread::yield_now();
        }
    }

    /// Marks task `task_id` completed in the status bitset
    pub(crate) fn mark_completed(&self, task_id: i64) {
        let index = task_id as usize;
        debug_assert!(index < self.task_status.size());
        self.task_status.test_and_set(index, true);
    }

    /// Spins until every task with an ID below `task_id` has completed
    pub(crate) fn wait_for_precedence(&self, task_id: i64) {
        let end = task_id as usize;
        while !self.task_status.is_all_in(0, end) {
            thread::yield_now();
        }
    }

    fn worker_loop(&self) {
        // Park until worker creation completes and the ID map is ready.
        self.num_tasks.wait(CREATING);
        let thread_id = self.current_thread_id();
        while self.workers_enabled() {
            if let Some(item) = self.fetch_item() {
                item.run(thread_id);
            } else {
                let state = self.num_tasks.load(Ordering::Acquire);
                if state > 0 {
                    // The worker just missed a queued item; it is in
                    // flight on another worker.
                    thread::yield_now();
                } else if state == 0 {
                    self.num_active_workers.fetch_sub(1, Ordering::AcqRel);
                    self.num_tasks.wait(0);
                    self.num_active_workers.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }
}

/// Work-stealing-free thread pool with task IDs, precedence and
/// loop-parallel dispatch
///
/// # Configuration
/// - `with_threads(n, ..)`: worker count; 0 matches the logical cores
/// - `set_capacity`: task-queue capacity (default 1024); changing it
///   drains and resets the manager
/// - `wait_for_precedence` (per task): run only after every smaller task
///   ID has completed
pub struct ThreadManager {
    core: Arc<ManagerCore>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadManager {
    /// Thread ID reported for threads the manager does not own
    pub const UNMANAGED_THREAD_ID: i64 = i64::MIN;

    /// Creates as many workers as there are logical cores
    pub fn new(resource: ResourceArc) -> AllocResult<Self> {
        Self::with_threads(0, resource)
    }

    /// Creates exactly `num_of_threads` workers (0 means logical cores)
    pub fn with_threads(num_of_threads: usize, resource: ResourceArc) -> AllocResult<Self> {
        let n = if num_of_threads == 0 { Self::logical_cores() } else { num_of_threads };

        let task_status = AtomicBitset::new(TASK_STATUS_SIZE, Arc::clone(&resource))?;
        let mut task_storage = Vec::with_capacity(TASK_STATUS_SIZE);
        for _ in 0..TASK_STATUS_SIZE {
            let storage =
                MonotonicResource::new(TASK_STORAGE_SIZE, ALIGNMENT_MAX, Arc::clone(&resource))?;
            task_storage.push(Arc::new(storage));
        }

        let core = Arc::new(ManagerCore {
            task_id_count: CachePadded::new(AtomicI64::new(0)),
            num_tasks: CachePadded::new(WaitableAtomic::new(CREATING)),
            num_active_workers: CachePadded::new(AtomicI64::new(n as i64)),
            queue: RwLock::new(ArrayQueue::new(DEFAULT_CAPACITY)),
            task_status,
            worker_ids: OnceLock::new(),
            task_storage,
            upstream: resource,
        });

        let mut manager = Self { core, workers: Vec::with_capacity(n) };
        manager.create_workers(n);
        Ok(manager)
    }

    /// Returns the number of logical cores
    pub fn logical_cores() -> usize {
        thread::available_parallelism().map(|cores| cores.get()).unwrap_or(1)
    }

    /// Returns the default task-queue capacity
    pub const fn default_capacity() -> usize {
        DEFAULT_CAPACITY
    }

    /// Returns the number of worker threads
    #[inline]
    pub fn num_of_threads(&self) -> usize {
        self.workers.len()
    }

    /// Returns the dense worker ID of the calling thread
    ///
    /// Worker threads map to `[0, num_of_threads)`; any other thread
    /// gets `UNMANAGED_THREAD_ID`.
    pub fn current_thread_id(&self) -> i64 {
        self.core.current_thread_id()
    }

    /// Returns the task-queue capacity in items
    pub fn capacity(&self) -> usize {
        self.core.queue.read().capacity()
    }

    /// Returns the number of queued items
    pub fn size(&self) -> usize {
        self.core.queue.read().len()
    }

    /// Checks whether the task queue is empty
    pub fn is_empty(&self) -> bool {
        self.core.queue.read().is_empty()
    }

    /// Returns the upstream memory resource
    pub fn resource(&self) -> &ResourceArc {
        &self.core.upstream
    }

    /// Changes the task-queue capacity; queued tasks are cleared
    pub fn set_capacity(&self, capacity: usize) {
        self.core.wait_for_completion();
        let capacity = capacity.max(1);
        *self.core.queue.write() = ArrayQueue::new(capacity);
        self.clear();
        debug!(capacity, "task queue capacity changed");
    }

    /// Drains the manager and resets IDs and completion state
    pub fn clear(&self) {
        self.core.wait_for_completion();
        debug_assert!(self.core.num_active_workers.load(Ordering::Acquire) == 0);
        self.core.task_id_count.store(0, Ordering::Release);
        self.core.drain_queue();
        self.core.task_status.reset(false);
    }

    /// Blocks the calling thread until every queued task has been
    /// claimed and every worker has gone idle
    ///
    /// Termination detection only; callers that need a happens-before
    /// relationship with task side effects must use the returned future.
    pub fn wait_for_completion(&self) {
        self.core.wait_for_completion();
    }

    /// Runs `task` on a worker thread
    pub fn enqueue<F, T>(&self, task: F, wait_for_precedence: bool) -> Result<TaskFuture<T>, EnqueueError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_with_id(move |_| task(), wait_for_precedence)
    }

    /// Runs `task` on a worker thread, passing the worker's dense ID
    pub fn enqueue_with_id<F, T>(
        &self,
        task: F,
        wait_for_precedence: bool,
    ) -> Result<TaskFuture<T>, EnqueueError>
    where
        F: FnOnce(i64) -> T + Send + 'static,
        T: Send + 'static,
    {
        let layout = Layout::new::<SingleTask<F, T>>();
        // The return value needs promise storage on top of the task
        // object; three times its size is the sizing heuristic.
        let preferred = 3 * size_of::<T>() + size_of::<SingleTask<F, T>>();
        let (ptr, resource, task_id) = self.reserve_task_storage(layout, preferred)?;

        let (promise, future) = TaskFuture::channel(task_id);
        let info = encode_info(task_id, wait_for_precedence);
        let single = SingleTask::new(info, task, promise, Arc::clone(&self.core));
        let shared = unsafe { Self::assemble(ptr, layout, resource, single) };

        match self.dispatch(shared, 1) {
            Ok(()) => Ok(future),
            Err(mut overflow) => {
                overflow.future = Some(Box::new(future));
                Err(EnqueueError::Overflow(overflow))
            }
        }
    }

    /// Runs `task` once per item of `range`, distributed over the pool
    pub fn enqueue_loop<I, F>(
        &self,
        range: I,
        task: F,
        wait_for_precedence: bool,
    ) -> Result<TaskFuture<()>, EnqueueError>
    where
        I: ExactSizeIterator + Clone + Send + Sync + 'static,
        F: Fn(I::Item) + Send + Sync + 'static,
    {
        self.enqueue_loop_with_id(range, move |item, _| task(item), wait_for_precedence)
    }

    /// Runs `task` once per item of `range`, passing the worker's ID
    pub fn enqueue_loop_with_id<I, F>(
        &self,
        range: I,
        task: F,
        wait_for_precedence: bool,
    ) -> Result<TaskFuture<()>, EnqueueError>
    where
        I: ExactSizeIterator + Clone + Send + Sync + 'static,
        F: Fn(I::Item, i64) + Send + Sync + 'static,
    {
        let num_items = range.len() as i64;
        let layout = Layout::new::<LoopTask<I, F>>();
        let preferred = 3 * size_of::<*const ()>() + size_of::<LoopTask<I, F>>();
        let (ptr, resource, task_id) = self.reserve_task_storage(layout, preferred)?;

        let (promise, future) = TaskFuture::channel(task_id);
        let info = encode_info(task_id, wait_for_precedence);
        let looped = LoopTask::new(info, task, range, promise, Arc::clone(&self.core));
        let shared = unsafe { Self::assemble(ptr, layout, resource, looped) };

        match self.dispatch(shared, num_items) {
            Ok(()) => Ok(future),
            Err(mut overflow) => {
                overflow.future = Some(Box::new(future));
                Err(EnqueueError::Overflow(overflow))
            }
        }
    }

    fn create_workers(&mut self, n: usize) {
        debug!(num_of_threads = n, "spawning worker threads");
        for _ in 0..n {
            let core = Arc::clone(&self.core);
            self.workers.push(thread::spawn(move || core.worker_loop()));
        }

        let ids: HashMap<ThreadId, i64> = self
            .workers
            .iter()
            .enumerate()
            .map(|(index, handle)| (handle.thread().id(), index as i64))
            .collect();
        let _ = self.core.worker_ids.set(ids);

        // Open the creation barrier, then wait until every worker has
        // actually parked idle so the pool is ready on return.
        self.core.num_tasks.store(0, Ordering::Release);
        self.core.num_tasks.notify_all();
        self.core.wait_for_completion();
    }

    /// Issues a new task ID, recycling the ID space when it is spent
    ///
    /// Recycling is safe: it only happens when every previously issued
    /// ID has completed, or after a full `clear()` quiesce.
    fn issue_task_id(&self) -> i64 {
        let core = &self.core;
        let mut id = core.task_id_count.fetch_add(1, Ordering::AcqRel);
        let index = id as usize;
        if index >= core.task_status.size()
            || (index > 0 && core.task_status.is_all_in(0, index))
        {
            self.clear();
            id = core.task_id_count.fetch_add(1, Ordering::AcqRel);
        }
        id
    }

    /// Reserves storage for a task object, preferring the per-ID arena
    ///
    /// Each retry issues a fresh ID; arenas of completed tasks get
    /// released on the way, so later attempts can succeed where earlier
    /// ones failed. The last failure propagates.
    fn reserve_task_storage(
        &self,
        layout: Layout,
        preferred_size: usize,
    ) -> AllocResult<(NonNull<u8>, ResourceArc, i64)> {
        let core = &self.core;
        let mut attempt = 0;
        loop {
            let task_id = self.issue_task_id();
            let storage = &core.task_storage[task_id as usize];
            if !storage.is_occupied() {
                storage.release();
            }
            let resource: ResourceArc = if preferred_size <= storage.capacity() {
                let arena: ResourceArc = Arc::clone(storage) as ResourceArc;
                arena
            } else {
                Arc::clone(&core.upstream)
            };
            match unsafe { resource.allocate(layout) } {
                Ok(raw) => return Ok((raw.cast::<u8>(), resource, task_id)),
                Err(error) => {
                    attempt += 1;
                    if attempt == ALLOC_ATTEMPTS {
                        return Err(error);
                    }
                    trace!(attempt, "task allocation failed, retrying with a fresh id");
                }
            }
        }
    }

    /// Writes a task into reserved storage and wraps it for sharing
    ///
    /// # Safety
    /// `ptr` must be valid storage of `layout` obtained from `resource`.
    unsafe fn assemble<P: PackagedTask + 'static>(
        ptr: NonNull<u8>,
        layout: Layout,
        resource: ResourceArc,
        value: P,
    ) -> SharedTask {
        let typed = ptr.cast::<P>().as_ptr();
        unsafe { typed.write(value) };
        let erased: *mut dyn PackagedTask = typed;
        Arc::new(unsafe { TaskBox::from_raw(NonNull::new_unchecked(erased), layout, resource) })
    }

    /// Enqueues one worker item per iteration and wakes workers
    fn dispatch(&self, task: SharedTask, num_items: i64) -> Result<(), OverflowError> {
        let core = &self.core;
        core.num_tasks.fetch_add(num_items, Ordering::AcqRel);
        for offset in 0..num_items {
            let item = WorkerItem::new(Arc::clone(&task), offset);
            if core.queue.read().push(item).is_err() {
                let rest = num_items - offset;
                core.num_tasks.fetch_sub(rest, Ordering::AcqRel);
                core.num_tasks.notify_all();
                warn!(offset, num_items, "task queue overflow");
                return Err(OverflowError {
                    task,
                    begin_offset: offset,
                    num_of_iterations: num_items,
                    future: None,
                });
            }
            core.num_tasks.notify_one();
        }
        Ok(())
    }
}

impl Drop for ThreadManager {
    /// Signals shutdown and joins every worker; outstanding tasks are
    /// abandoned without running and their futures fail
    fn drop(&mut self) {
        trace!("shutting down thread manager");
        self.core.num_tasks.store(SHUTTING_DOWN, Ordering::Release);
        self.core.num_tasks.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.core.num_active_workers.store(0, Ordering::Release);
        self.core.task_id_count.store(0, Ordering::Release);
        self.core.drain_queue();
        self.core.task_status.reset(false);
    }
}

impl core::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("num_of_threads", &self.num_of_threads())
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SystemAllocator;
    use crate::executor::future::TaskError;

    fn manager(threads: usize) -> ThreadManager {
        ThreadManager::with_threads(threads, Arc::new(SystemAllocator::new())).unwrap()
    }

    #[test]
    fn test_single_task() {
        let manager = manager(2);
        let future = manager.enqueue(|| 6 * 7, false).unwrap();
        assert_eq!(future.get().unwrap(), 42);
    }

    #[test]
    fn test_task_receives_worker_id() {
        let manager = manager(3);
        let future = manager.enqueue_with_id(|thread_id| thread_id, false).unwrap();
        let thread_id = future.get().unwrap();
        assert!((0..3).contains(&thread_id));
    }

    #[test]
    fn test_unmanaged_thread_sentinel() {
        let manager = manager(2);
        assert_eq!(manager.current_thread_id(), ThreadManager::UNMANAGED_THREAD_ID);
    }

    #[test]
    fn test_defaults() {
        let manager = manager(1);
        assert_eq!(manager.num_of_threads(), 1);
        assert_eq!(manager.capacity(), ThreadManager::default_capacity());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_zero_threads_matches_cores() {
        let manager = manager(0);
        assert_eq!(manager.num_of_threads(), ThreadManager::logical_cores());
    }

    #[test]
    fn test_task_ids_are_stable_on_futures() {
        // One worker pinned on a gate keeps earlier IDs incomplete, so
        // no recycling can renumber the later tasks.
        let manager = manager(1);
        let gate = Arc::new(WaitableAtomic::new(0));
        let blocker = {
            let gate = Arc::clone(&gate);
            manager
                .enqueue(
                    move || {
                        gate.wait(0);
                    },
                    false,
                )
                .unwrap()
        };
        let a = manager.enqueue(|| (), false).unwrap();
        let b = manager.enqueue(|| (), false).unwrap();
        assert_eq!(blocker.id(), 0);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);

        gate.store(1, Ordering::Release);
        gate.notify_all();
        blocker.get().unwrap();
        a.get().unwrap();
        b.get().unwrap();
    }

    #[test]
    fn test_panicking_task_fails_future_and_releases_precedence() {
        let manager = manager(2);
        let panicking = manager.enqueue(|| panic!("task failure"), false).unwrap();
        // A precedence-waiting successor still runs because the
        // completion bit is set even for failed tasks.
        let successor = manager.enqueue(|| 5, true).unwrap();

        match panicking.get() {
            Err(TaskError::Panicked(payload)) => {
                assert_eq!(payload.message(), Some("task failure"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(successor.get().unwrap(), 5);
    }

    #[test]
    fn test_empty_loop_completes() {
        let manager = manager(2);
        let future = manager.enqueue_loop(0..0usize, |_| {}, false).unwrap();
        future.get().unwrap();
    }

    #[test]
    fn test_loop_runs_every_iteration() {
        let manager = manager(4);
        let hits = Arc::new(std::sync::Mutex::new(vec![0u32; 100]));
        let future = {
            let hits = Arc::clone(&hits);
            manager
                .enqueue_loop(0..100usize, move |index| hits.lock().unwrap()[index] += 1, false)
                .unwrap()
        };
        future.get().unwrap();
        assert!(hits.lock().unwrap().iter().all(|&count| count == 1));
    }

    #[test]
    fn test_clear_resets_ids() {
        let manager = manager(1);
        let future = manager.enqueue(|| (), false).unwrap();
        future.get().unwrap();
        manager.wait_for_completion();
        manager.clear();
        let future = manager.enqueue(|| (), false).unwrap();
        assert_eq!(future.id(), 0);
        future.get().unwrap();
    }

    #[test]
    fn test_set_capacity() {
        let manager = manager(1);
        manager.set_capacity(16);
        assert_eq!(manager.capacity(), 16);
    }

    #[test]
    fn test_shutdown_abandons_queued_tasks() {
        // A single busy worker guarantees the second task is still
        // queued when the manager drops.
        let manager = manager(1);
        let gate = Arc::new(WaitableAtomic::new(0));
        let blocker = {
            let gate = Arc::clone(&gate);
            manager
                .enqueue(
                    move || {
                        gate.wait(0);
                    },
                    false,
                )
                .unwrap()
        };
        let stranded = manager.enqueue(|| 9, false).unwrap();

        // Start the shutdown first; its very first step publishes the
        // shutdown sentinel, so once the gate opens the worker exits
        // without touching the queued task.
        let dropper = thread::spawn(move || drop(manager));
        thread::sleep(std::time::Duration::from_millis(200));
        gate.store(1, Ordering::Release);
        gate.notify_all();
        dropper.join().unwrap();

        blocker.get().unwrap();
        assert!(matches!(stranded.get(), Err(TaskError::Abandoned)));
    }
}
