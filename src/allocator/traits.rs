//! Allocator traits
//!
//! Provides the polymorphic memory-resource interface consumed and
//! implemented by every resource in this crate:
//! - `Allocator`: raw aligned allocation with explicit layouts
//! - `ThreadSafeAllocator`: marker for resources shareable across threads
//! - `MemoryUsage`: capacity reporting
//! - `Resettable`: bulk invalidation of outstanding allocations
//!
//! Resources are injected as `ResourceArc` handles and can be chained:
//! a pool or an arena is itself an `Allocator` drawing from an upstream
//! resource.

use core::alloc::Layout;
use core::ptr::NonNull;

use std::sync::Arc;

use crate::error::AllocResult;

/// Shared handle to a thread-safe memory resource
///
/// All internal containers (bitset chunks, slot slabs, arena blocks)
/// are allocated through a handle of this type.
pub type ResourceArc = Arc<dyn ThreadSafeAllocator>;

/// Polymorphic memory-resource interface
///
/// # Safety Requirements
///
/// Implementors must ensure that:
/// - Returned pointers are valid and properly aligned for the layout
/// - Deallocation only occurs for pointers this resource handed out
/// - Layout information matches between allocation and deallocation
pub unsafe trait Allocator {
    /// Allocates memory with the given layout
    ///
    /// # Safety
    /// - Returned memory is uninitialized and must be initialized before
    ///   use
    /// - The pointer must be released through `deallocate` on the same
    ///   resource with the same layout
    ///
    /// # Errors
    /// Returns an error if the resource cannot satisfy the request.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Deallocates memory at the given pointer with the specified layout
    ///
    /// # Safety
    /// - `ptr` must have been allocated by this resource
    /// - `layout` must match the original allocation layout exactly
    /// - Double-free is undefined behavior
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Checks whether two resources are interchangeable
    ///
    /// Memory allocated from one resource may be deallocated through
    /// another only if the two compare equal. The default is address
    /// identity; resources with distinguishable storage may override.
    fn is_equal(&self, other: &dyn Allocator) -> bool
    where
        Self: Sized,
    {
        core::ptr::addr_eq(self as *const Self as *const (), other as *const dyn Allocator)
    }
}

/// Thread-safe allocator marker trait
///
/// # Safety
/// Implementors must ensure that concurrent `allocate` and `deallocate`
/// calls from different threads are safe and that internal state is
/// properly synchronized.
pub unsafe trait ThreadSafeAllocator: Allocator + Send + Sync {}

/// Memory usage reporting trait
pub trait MemoryUsage {
    /// Returns current allocated memory in bytes
    fn used_memory(&self) -> usize;

    /// Returns remaining available memory in bytes
    ///
    /// Returns `None` if the resource has no inherent limit.
    fn available_memory(&self) -> Option<usize>;

    /// Returns total memory capacity in bytes
    ///
    /// Returns `None` if the resource has no inherent limit.
    fn total_memory(&self) -> Option<usize> {
        self.available_memory().map(|available| self.used_memory() + available)
    }
}

/// Resettable allocator trait
///
/// Resources implementing this trait can invalidate every outstanding
/// allocation at once and return to their initial state.
pub trait Resettable {
    /// Resets the resource, invalidating all previous allocations
    ///
    /// # Safety
    /// All pointers from previous allocations become invalid
    /// immediately; the caller must ensure no live references exist.
    unsafe fn reset(&self);
}

// ============================================================================
// Blanket implementations for references and smart pointers
// ============================================================================

unsafe impl<T: Allocator + ?Sized> Allocator for &T {
    #[inline]
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        unsafe { (**self).allocate(layout) }
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

unsafe impl<T: Allocator + ?Sized> Allocator for Arc<T> {
    #[inline]
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        unsafe { (**self).allocate(layout) }
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

impl<T: MemoryUsage + ?Sized> MemoryUsage for &T {
    fn used_memory(&self) -> usize {
        (**self).used_memory()
    }

    fn available_memory(&self) -> Option<usize> {
        (**self).available_memory()
    }
}
