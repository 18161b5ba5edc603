//! Allocator capability for queue storage.
//!
//! Queues never call the global allocator directly. Every slot buffer is
//! obtained from a [`RawAlloc`], which is chosen per queue instantiation and
//! defaults to [`Global`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Allocates and frees raw memory blocks for contiguous slot arrays.
///
/// Construction and destruction of the elements stored in those blocks is
/// handled by the queue; an allocator only hands out and takes back memory.
///
/// # Safety
///
/// Implementers must ensure:
/// - `allocate` returns a block valid for reads and writes of `layout.size()`
///   bytes and aligned to `layout.align()`, or diverges (e.g. via
///   [`alloc::handle_alloc_error`])
/// - the block stays valid until it is passed to `deallocate`
/// - blocks handed out by one instance may be freed by any clone of it
pub unsafe trait RawAlloc {
    /// Allocates a block for `layout`. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`RawAlloc::allocate`] on this
    /// allocator (or a clone of it) with the same `layout`, and must not be
    /// used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide Rust global allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Global;

// SAFETY: Delegates to the global allocator, which upholds the contract.
unsafe impl RawAlloc for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0, "zero-sized allocation request");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        }
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees ptr came from `allocate` with this layout.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

// SAFETY: Forwarding to the referenced allocator preserves its guarantees.
unsafe impl<A: RawAlloc + ?Sized> RawAlloc for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Global-backed allocator that counts live blocks.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct CountingAlloc {
        live: Arc<AtomicUsize>,
        total: Arc<AtomicUsize>,
    }

    impl CountingAlloc {
        pub(crate) fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub(crate) fn total(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }
    }

    unsafe impl RawAlloc for CountingAlloc {
        fn allocate(&self, layout: Layout) -> NonNull<u8> {
            self.live.fetch_add(1, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            unsafe { Global.deallocate(ptr, layout) }
        }
    }
}
