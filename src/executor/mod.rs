//! Task-parallel execution engine
//!
//! The executor couples the memory resources with a work pool: packaged
//! tasks carry a result channel and precedence metadata, worker items
//! distribute loop iterations, and the thread manager owns the workers
//! and the queue.

mod future;
mod task;
mod thread_manager;
mod wait;

pub use future::{PanicPayload, Promise, TaskError, TaskFuture, TaskResult};
pub use task::{PackagedTask, SharedTask, TaskBox};
pub use thread_manager::{EnqueueError, OverflowError, ThreadManager};
pub use wait::WaitableAtomic;
