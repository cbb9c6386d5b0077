//! # taskforge
//!
//! Lock-free memory resources and a task-parallel thread manager.
//!
//! The crate is built bottom-up from four cooperating pieces:
//! - [`bitset::AtomicBitset`]: word-granular concurrent bit queries and
//!   updates over cache-line-aligned chunks
//! - [`allocator::FixedArrayResource`]: a fixed-capacity object pool
//!   with lock-free slot allocation backed by the bitset
//! - [`allocator::MonotonicResource`]: a bump arena with bulk release
//! - [`executor::ThreadManager`]: a thread pool dispatching single and
//!   loop-parallel tasks with stable worker IDs and precedence
//!   constraints between task IDs
//!
//! All internal storage is drawn through the injectable memory-resource
//! interface in [`allocator`], so pools, arenas and the manager compose
//! into larger allocation topologies.
//!
//! ```
//! use std::sync::Arc;
//! use taskforge::allocator::SystemAllocator;
//! use taskforge::executor::ThreadManager;
//!
//! let manager = ThreadManager::with_threads(2, Arc::new(SystemAllocator::new())).unwrap();
//! let future = manager.enqueue(|| 6 * 7, false).unwrap();
//! assert_eq!(future.get().unwrap(), 42);
//! ```

pub mod allocator;
pub mod bitset;
pub mod error;
pub mod executor;
pub mod utils;

pub use allocator::{
    Allocator, FixedArrayResource, MemoryUsage, MonotonicResource, ResourceArc, Resettable,
    SystemAllocator, ThreadSafeAllocator,
};
pub use bitset::AtomicBitset;
pub use error::{AllocError, AllocErrorKind, AllocResult};
pub use executor::{EnqueueError, OverflowError, TaskError, TaskFuture, ThreadManager};
