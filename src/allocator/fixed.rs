//! Fixed-capacity object-pool memory resource
//!
//! A `FixedArrayResource<T>` owns a slab of `N` slots sized and aligned
//! for `T` plus an atomic bitset marking which slots are handed out.
//! Allocation reserves a slot through the counter, scatters contending
//! threads across the slab with an index permutation, then claims the
//! first free bit found by a bounded two-pass word scan. Slots never
//! move; pointers stay stable until deallocated.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::allocator::{Allocator, MemoryUsage, ResourceArc, Resettable, ThreadSafeAllocator};
use crate::bitset::AtomicBitset;
use crate::error::{AllocError, AllocErrorKind, AllocResult};
use crate::utils::{bit_width, cache_line_size};

const INVALID_INDEX: usize = usize::MAX;

/// Slab of `N` slots of type `T` with lock-free slot allocation
///
/// The pool implements the memory-resource interface itself, so it can
/// be chained under other resources. Requests larger or more aligned
/// than one slot are rejected with a structured error.
pub struct FixedArrayResource<T> {
    count: CachePadded<AtomicUsize>,
    slots: NonNull<MaybeUninit<T>>,
    capacity: usize,
    used: AtomicBitset,
    upstream: ResourceArc,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for FixedArrayResource<T> {}
unsafe impl<T: Send> Sync for FixedArrayResource<T> {}

impl<T> FixedArrayResource<T> {
    /// Creates a pool with the default capacity of one slot
    pub fn new(upstream: ResourceArc) -> AllocResult<Self> {
        Self::with_capacity(1, upstream)
    }

    /// Creates a pool with `capacity` slots
    pub fn with_capacity(capacity: usize, upstream: ResourceArc) -> AllocResult<Self> {
        const { assert!(core::mem::size_of::<T>() != 0, "zero-sized slot types are not supported") };
        let mut pool = Self {
            count: CachePadded::new(AtomicUsize::new(0)),
            slots: NonNull::dangling(),
            capacity: 0,
            used: AtomicBitset::new(0, Arc::clone(&upstream))?,
            upstream,
            _marker: PhantomData,
        };
        pool.set_capacity(capacity)?;
        Ok(pool)
    }

    /// Maximum size of one request
    #[inline]
    pub const fn size_max() -> usize {
        core::mem::size_of::<T>()
    }

    /// Maximum alignment of one request
    #[inline]
    pub const fn alignment_max() -> usize {
        core::mem::align_of::<T>()
    }

    /// Returns the number of outstanding allocations
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns the number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resizes the slab and the inner bitset and resets the counter
    ///
    /// Outstanding allocations are invalidated; the caller must have
    /// quiesced the pool.
    pub fn set_capacity(&mut self, capacity: usize) -> AllocResult<()> {
        if capacity != self.capacity {
            let slots = Self::allocate_slots(&self.upstream, capacity)?;
            self.release_slots();
            self.slots = slots;
            self.capacity = capacity;
        }
        self.used.resize(capacity)?;
        self.clear();
        Ok(())
    }

    /// Marks every slot free and zeroes the counter
    pub fn clear(&self) {
        self.count.store(0, Ordering::Release);
        self.used.reset(false);
    }

    /// Returns the base pointer of the slot slab
    #[inline]
    pub fn data(&self) -> *mut T {
        self.slots.as_ptr().cast::<T>()
    }

    /// Reserves one slot and returns its address
    fn allocate_slot(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        if size > Self::size_max() || alignment > Self::alignment_max() {
            let reason = if size > Self::size_max() {
                "the required size exceeds the slot size"
            } else {
                "the required alignment exceeds the slot alignment"
            };
            return Err(AllocError::exceeds_capacity(size, alignment, reason));
        }

        // Issue an index hint for finding a free slot.
        let hint = self.count.fetch_add(1, Ordering::AcqRel);
        if hint >= self.capacity {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(AllocError::new(
                AllocErrorKind::OutOfMemory,
                size,
                alignment,
                "the allocation count exceeded the pool capacity",
            ));
        }
        let hint = self.permute_index(hint);

        let index = self.find_and_claim(hint);
        if index == INVALID_INDEX {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(AllocError::new(
                AllocErrorKind::OutOfMemory,
                size,
                alignment,
                "no free slot found",
            ));
        }

        let slot = unsafe { self.slots.as_ptr().add(index) };
        Ok(unsafe { NonNull::new_unchecked(slot.cast::<u8>()) })
    }

    /// Scatters consecutive counter values across cache lines
    ///
    /// Rotates the index left by `bit_width(8 * cache_line)` within the
    /// `bit_width(N)` low bits so that contending threads start their
    /// search in different chunks; out-of-range results fall back to the
    /// raw index.
    fn permute_index(&self, index: usize) -> usize {
        let shift = bit_width(8 * cache_line_size());
        let n = self.capacity;
        let bits = bit_width(n);
        if shift < bits {
            let upper = index << shift;
            let lower = index >> (bits - shift);
            let mask = (1usize << bits) - 1;
            let permuted = (upper | lower) & mask;
            if permuted < n { permuted } else { index }
        } else {
            index
        }
    }

    /// Searches from `start` for a free slot and claims it atomically
    ///
    /// Scans word by word with a mask blotting out positions below the
    /// hint in the first word. The scan wraps once past the end; after
    /// `2 * num_words` word visits the sentinel `INVALID_INDEX` is
    /// returned.
    fn find_and_claim(&self, start: usize) -> usize {
        const BLOCK_BITS: usize = AtomicBitset::BLOCK_BITS;
        let n = self.capacity;
        let num_blocks = n.div_ceil(BLOCK_BITS);
        let end = 2 * num_blocks;

        let mut index = start - (start % BLOCK_BITS);
        let mut mask: u64 = (1u64 << (start % BLOCK_BITS)) - 1;
        let mut scanned = 0;
        while scanned < end {
            debug_assert!(index % BLOCK_BITS == 0);
            // Checked low bits appear taken through the mask.
            let block = self.used.get_block(index) | mask;
            let used_run = block.trailing_ones() as usize;
            let candidate = index + used_run;
            if used_run != BLOCK_BITS && candidate < n {
                if !self.used.test_and_set(candidate, true) {
                    return candidate;
                }
                // Lost the claim race; rescan the same word.
            } else {
                scanned += 1;
                if scanned == end {
                    break;
                }
                index = if candidate >= n { 0 } else { index + BLOCK_BITS };
                mask = 0;
            }
        }
        INVALID_INDEX
    }

    fn slot_layout(capacity: usize) -> AllocResult<Layout> {
        Layout::array::<MaybeUninit<T>>(capacity)
            .map_err(|_| AllocError::size_overflow(capacity, core::mem::align_of::<T>()))
    }

    fn allocate_slots(upstream: &ResourceArc, capacity: usize) -> AllocResult<NonNull<MaybeUninit<T>>> {
        if capacity == 0 {
            return Ok(NonNull::dangling());
        }
        let layout = Self::slot_layout(capacity)?;
        let raw = unsafe { upstream.allocate(layout)? };
        Ok(raw.cast::<MaybeUninit<T>>())
    }

    fn release_slots(&mut self) {
        if self.capacity == 0 {
            return;
        }
        // Layout construction succeeded at allocation time.
        if let Ok(layout) = Layout::array::<MaybeUninit<T>>(self.capacity) {
            unsafe { self.upstream.deallocate(self.slots.cast(), layout) };
        }
        self.capacity = 0;
    }

    #[inline]
    fn slab_addr(&self) -> usize {
        self.slots.as_ptr() as usize
    }
}

unsafe impl<T> Allocator for FixedArrayResource<T> {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        let ptr = self.allocate_slot(layout.size(), layout.align())?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        let address = ptr.as_ptr() as usize;
        let offset = address - self.slab_addr();
        let index = offset / core::mem::size_of::<MaybeUninit<T>>();
        debug_assert!(offset % core::mem::size_of::<MaybeUninit<T>>() == 0);
        debug_assert!(index < self.capacity, "the data is unmanaged");
        let had_ownership = self.used.test_and_set(index, false);
        debug_assert!(had_ownership, "the ownership of the slot was broken");
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

unsafe impl<T: Send> ThreadSafeAllocator for FixedArrayResource<T> {}

impl<T> MemoryUsage for FixedArrayResource<T> {
    fn used_memory(&self) -> usize {
        self.count() * core::mem::size_of::<T>()
    }

    fn available_memory(&self) -> Option<usize> {
        Some((self.capacity - self.count().min(self.capacity)) * core::mem::size_of::<T>())
    }
}

impl<T> Resettable for FixedArrayResource<T> {
    unsafe fn reset(&self) {
        self.clear();
    }
}

impl<T> Drop for FixedArrayResource<T> {
    fn drop(&mut self) {
        self.release_slots();
    }
}

impl<T> core::fmt::Debug for FixedArrayResource<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedArrayResource")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish()
    }
}
