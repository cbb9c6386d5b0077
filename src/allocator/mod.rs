//! Memory resources
//!
//! This module provides the polymorphic memory-resource interface and
//! the resources built on it: the system upstream, a fixed-capacity
//! object pool and a monotonic bump arena. Resources chain: pools and
//! arenas draw their storage from an injected upstream handle and are
//! themselves injectable.

mod fixed;
mod monotonic;
mod system;
mod traits;

pub use fixed::FixedArrayResource;
pub use monotonic::MonotonicResource;
pub use system::SystemAllocator;
pub use traits::{Allocator, MemoryUsage, ResourceArc, Resettable, ThreadSafeAllocator};

pub use crate::error::{AllocError, AllocErrorKind, AllocResult};

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;
    use std::sync::Arc;

    #[test]
    fn test_resources_chain() {
        // An arena drawing its block from a pool of arena-sized slots.
        let upstream: ResourceArc = Arc::new(SystemAllocator::new());
        let pool: ResourceArc = Arc::new(
            FixedArrayResource::<[u8; 1024]>::with_capacity(2, upstream).unwrap(),
        );
        let arena = MonotonicResource::new(1024, 1, Arc::clone(&pool)).unwrap();

        let layout = Layout::from_size_align(64, 8).unwrap();
        let ptr = unsafe { arena.allocate(layout).unwrap() };
        unsafe { arena.deallocate(ptr.cast(), layout) };
        assert!(!arena.is_occupied());
    }
}
