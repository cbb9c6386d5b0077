//! Packaged tasks
//!
//! A packaged task is a type-erased unit of work bound to a result
//! channel and precedence metadata. Two variants exist: a single task
//! runs its payload once, a loop task runs it once per iteration offset
//! and fulfills its promise only when the last reference is dropped, so
//! the future completes after every iteration has either run or been
//! skipped through overflow recovery.
//!
//! Tasks are shared between the enqueueing thread and all workers, and
//! they live in a caller-chosen memory resource (the per-task arena when
//! it fits, the upstream resource otherwise).

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::allocator::{Allocator, ResourceArc};
use crate::executor::future::Promise;
use crate::executor::thread_manager::ManagerCore;

/// Packs a task ID and the wait-for-precedence flag into one word
#[inline]
pub(crate) const fn encode_info(task_id: i64, wait_for_precedence: bool) -> i64 {
    (task_id << 1) | wait_for_precedence as i64
}

#[inline]
pub(crate) const fn decode_id(info: i64) -> i64 {
    info >> 1
}

#[inline]
pub(crate) const fn decode_wait(info: i64) -> bool {
    info & 1 == 1
}

/// Type-erased unit of work with a result channel
pub trait PackagedTask: Send + Sync {
    /// Returns the encoded task info word
    fn info(&self) -> i64;

    /// Runs one invocation of the underlying payload
    ///
    /// Blocks first on the manager's precedence bitset when the task was
    /// enqueued with wait-for-precedence. `offset` selects the iteration
    /// for loop tasks and is ignored by single tasks.
    fn run(&self, thread_id: i64, offset: i64);

    /// Returns the task ID
    #[inline]
    fn id(&self) -> i64 {
        decode_id(self.info())
    }

    /// Checks if every task with a smaller ID must complete before this
    /// one runs
    #[inline]
    fn wait_for_precedence(&self) -> bool {
        decode_wait(self.info())
    }
}

/// A packaged task placed in a caller-chosen memory resource
///
/// Owns the task storage: dropping the box runs the task's destructor
/// and returns the memory to the resource it came from.
pub struct TaskBox {
    ptr: NonNull<dyn PackagedTask>,
    layout: Layout,
    resource: ResourceArc,
}

// The pointee is Send + Sync by the trait bound and uniquely owned.
unsafe impl Send for TaskBox {}
unsafe impl Sync for TaskBox {}

impl TaskBox {
    /// Takes ownership of a task previously written to `ptr`
    ///
    /// # Safety
    /// - `ptr` must point to a live `P: PackagedTask` allocated from
    ///   `resource` with `layout`
    /// - Ownership of both the value and the storage transfers to the
    ///   box
    pub(crate) unsafe fn from_raw(
        ptr: NonNull<dyn PackagedTask>,
        layout: Layout,
        resource: ResourceArc,
    ) -> Self {
        Self { ptr, layout, resource }
    }
}

impl core::ops::Deref for TaskBox {
    type Target = dyn PackagedTask;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for TaskBox {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.resource.deallocate(self.ptr.cast(), self.layout);
        }
    }
}

impl core::fmt::Debug for TaskBox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskBox").field("id", &self.id()).finish_non_exhaustive()
    }
}

/// Shared ownership of a packaged task
///
/// The enqueueing caller and every queued worker item hold one
/// reference; the task is destroyed when the last of them releases it.
pub type SharedTask = Arc<TaskBox>;

/// One scheduled invocation: a shared task plus its iteration offset
pub(crate) struct WorkerItem {
    task: SharedTask,
    offset: i64,
}

impl WorkerItem {
    #[inline]
    pub(crate) fn new(task: SharedTask, offset: i64) -> Self {
        Self { task, offset }
    }

    #[inline]
    pub(crate) fn run(&self, thread_id: i64) {
        self.task.run(thread_id, self.offset);
    }
}

/// Single-invocation task
///
/// Payload and promise live behind a mutex so the one worker that
/// dequeues the item takes them; a task dropped without running (manager
/// shutdown) abandons its promise. The completion bit is set in `drop`
/// in both cases, strictly after the promise is resolved.
pub(crate) struct SingleTask<F, T> {
    info: i64,
    cell: Mutex<Option<(F, Promise<T>)>>,
    manager: Arc<ManagerCore>,
}

impl<F, T> SingleTask<F, T>
where
    F: FnOnce(i64) -> T,
{
    pub(crate) fn new(info: i64, payload: F, promise: Promise<T>, manager: Arc<ManagerCore>) -> Self {
        Self { info, cell: Mutex::new(Some((payload, promise))), manager }
    }
}

impl<F, T> PackagedTask for SingleTask<F, T>
where
    F: FnOnce(i64) -> T + Send,
    T: Send,
{
    fn info(&self) -> i64 {
        self.info
    }

    fn run(&self, thread_id: i64, _offset: i64) {
        let Some((payload, promise)) = self.cell.lock().take() else {
            return;
        };
        if self.wait_for_precedence() {
            self.manager.wait_for_precedence(self.id());
        }
        match catch_unwind(AssertUnwindSafe(|| payload(thread_id))) {
            Ok(value) => promise.complete(value),
            Err(panic) => promise.fail(panic),
        }
    }
}

impl<F, T> Drop for SingleTask<F, T> {
    fn drop(&mut self) {
        // An unconsumed promise abandons the future before the
        // completion bit becomes visible to precedence waiters.
        if let Some((_payload, promise)) = self.cell.get_mut().take() {
            drop(promise);
        }
        self.manager.mark_completed(decode_id(self.info));
    }
}

/// Loop task: one payload invocation per iteration offset
///
/// Stores the begin iterator and advances a clone by the offset carried
/// in each worker item. The promise is fulfilled in `drop`, failed with
/// the first recorded panic if any iteration panicked.
pub(crate) struct LoopTask<I, F> {
    info: i64,
    payload: F,
    begin: I,
    panic: Mutex<Option<Box<dyn Any + Send + 'static>>>,
    promise: Option<Promise<()>>,
    manager: Arc<ManagerCore>,
}

impl<I, F> LoopTask<I, F>
where
    I: Iterator + Clone,
    F: Fn(I::Item, i64),
{
    pub(crate) fn new(
        info: i64,
        payload: F,
        begin: I,
        promise: Promise<()>,
        manager: Arc<ManagerCore>,
    ) -> Self {
        Self {
            info,
            payload,
            begin,
            panic: Mutex::new(None),
            promise: Some(promise),
            manager,
        }
    }
}

impl<I, F> PackagedTask for LoopTask<I, F>
where
    I: Iterator + Clone + Send + Sync,
    F: Fn(I::Item, i64) + Send + Sync,
{
    fn info(&self) -> i64 {
        self.info
    }

    fn run(&self, thread_id: i64, offset: i64) {
        if self.wait_for_precedence() {
            self.manager.wait_for_precedence(self.id());
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            if let Some(item) = self.begin.clone().nth(offset as usize) {
                (self.payload)(item, thread_id);
            }
        }));
        if let Err(panic) = result {
            let mut slot = self.panic.lock();
            if slot.is_none() {
                *slot = Some(panic);
            }
        }
    }
}

impl<I, F> Drop for LoopTask<I, F> {
    fn drop(&mut self) {
        if let Some(promise) = self.promise.take() {
            match self.panic.get_mut().take() {
                Some(panic) => promise.fail(panic),
                None => promise.complete(()),
            }
        }
        self.manager.mark_completed(decode_id(self.info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{MonotonicResource, SystemAllocator};
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct ProbeTask {
        info: i64,
        runs: Arc<AtomicUsize>,
        drops: Arc<AtomicUsize>,
    }

    impl PackagedTask for ProbeTask {
        fn info(&self) -> i64 {
            self.info
        }

        fn run(&self, _thread_id: i64, _offset: i64) {
            self.runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Drop for ProbeTask {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_info_encoding() {
        let info = encode_info(21, true);
        assert_eq!(decode_id(info), 21);
        assert!(decode_wait(info));

        let info = encode_info(21, false);
        assert_eq!(decode_id(info), 21);
        assert!(!decode_wait(info));
    }

    #[test]
    fn test_task_box_owns_storage() {
        let arena: ResourceArc =
            Arc::new(MonotonicResource::new(256, 16, Arc::new(SystemAllocator::new())).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));

        let layout = Layout::new::<ProbeTask>();
        let raw = unsafe { arena.allocate(layout).unwrap() };
        let typed = raw.cast::<ProbeTask>().as_ptr();
        unsafe {
            typed.write(ProbeTask {
                info: encode_info(3, false),
                runs: Arc::clone(&runs),
                drops: Arc::clone(&drops),
            });
        }
        let erased: *mut dyn PackagedTask = typed;
        let shared: SharedTask = Arc::new(unsafe {
            TaskBox::from_raw(NonNull::new_unchecked(erased), layout, Arc::clone(&arena))
        });

        let item = WorkerItem::new(Arc::clone(&shared), 0);
        item.run(0);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(shared.id(), 3);
        assert!(!shared.wait_for_precedence());

        drop(item);
        drop(shared);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
