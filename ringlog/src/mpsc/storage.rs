//! Contiguous slot storage for the MPSC ring.
//!
//! [`RingStorage`] owns one allocation of `capacity` slots obtained from a
//! [`RawAlloc`]. It does not know which slots hold live values; the ring
//! tracks that with its cursors and tells the storage which logical range is
//! live whenever elements have to be moved or dropped.
//!
//! Slots are addressed by logical position. The physical index is
//! `position % capacity`.

use std::alloc::Layout;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::Range;
use std::ptr::{self, NonNull};

use crate::alloc::RawAlloc;

/// Largest capacity a queue can be created with or grown to.
pub const MAX_CAPACITY: usize = u32::MAX as usize - 1;

type Slot<T> = UnsafeCell<MaybeUninit<T>>;

/// Fixed-capacity slot buffer. Grows only through `&mut self`.
pub(crate) struct RingStorage<T, A: RawAlloc> {
    buffer: NonNull<Slot<T>>,
    capacity: usize,
    alloc: A,
    _owns: PhantomData<T>,
}

impl<T, A: RawAlloc> RingStorage<T, A> {
    /// Allocates `capacity` uninitialized slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or greater than [`MAX_CAPACITY`].
    pub(crate) fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        assert_capacity(capacity);
        let buffer = allocate_slots::<T, A>(capacity, &alloc);
        Self {
            buffer,
            capacity,
            alloc,
            _owns: PhantomData,
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) const fn allocator(&self) -> &A {
        &self.alloc
    }

    #[inline]
    fn slot_ptr(&self, pos: u64) -> *mut T {
        let index = (pos % self.capacity as u64) as usize;
        // SAFETY: index < capacity, so the offset stays inside the allocation
        // (or is a no-op for zero-sized slots).
        let slot = unsafe { self.buffer.as_ptr().add(index) };
        UnsafeCell::raw_get(slot).cast::<T>()
    }

    /// Moves `value` into the slot for `pos`.
    ///
    /// # Safety
    ///
    /// The slot must be vacant and the caller must hold exclusive write
    /// access to it (a claimed, not yet published position).
    #[inline]
    pub(crate) unsafe fn write(&self, pos: u64, value: T) {
        unsafe { self.slot_ptr(pos).write(value) }
    }

    /// Moves the value out of the slot for `pos`, leaving it vacant.
    ///
    /// # Safety
    ///
    /// The slot must be occupied and the caller must hold the extraction
    /// claim for `pos`.
    #[inline]
    pub(crate) unsafe fn take(&self, pos: u64) -> T {
        unsafe { self.slot_ptr(pos).read() }
    }

    /// Borrows the value in the slot for `pos`.
    ///
    /// # Safety
    ///
    /// The slot must be occupied and must not be written or taken while the
    /// returned reference is alive.
    #[inline]
    pub(crate) unsafe fn get(&self, pos: u64) -> &T {
        unsafe { &*self.slot_ptr(pos) }
    }

    /// Drops every value in the logical range `live`.
    ///
    /// # Safety
    ///
    /// Every position in `live` must be occupied. The slots are vacant
    /// afterwards.
    pub(crate) unsafe fn drop_range(&mut self, live: Range<u64>) {
        for pos in live {
            unsafe { ptr::drop_in_place(self.slot_ptr(pos)) };
        }
    }

    /// Replaces the buffer with a larger one, moving the values in `live` to
    /// physical slots `0..live.len()` in logical order.
    ///
    /// # Safety
    ///
    /// Every position in `live` must be occupied, `live` must span at most
    /// `capacity` positions, and `new_capacity` must be greater than the
    /// current capacity.
    pub(crate) unsafe fn grow(&mut self, new_capacity: usize, live: Range<u64>) {
        debug_assert!(new_capacity > self.capacity);
        assert_capacity(new_capacity);

        let fresh = allocate_slots::<T, A>(new_capacity, &self.alloc);
        for (index, pos) in live.enumerate() {
            // SAFETY: index < live.len() <= old capacity < new_capacity, and
            // the source slot is occupied. Moving bitwise leaves it vacant.
            unsafe {
                let dst = UnsafeCell::raw_get(fresh.as_ptr().add(index)).cast::<T>();
                ptr::copy_nonoverlapping(self.slot_ptr(pos), dst, 1);
            }
        }

        // SAFETY: The old buffer was allocated with the current capacity and
        // every live value has been moved out of it.
        unsafe { deallocate_slots::<T, A>(self.buffer, self.capacity, &self.alloc) };
        self.buffer = fresh;
        self.capacity = new_capacity;
    }

    /// Swaps in a freshly allocated buffer of the same capacity.
    ///
    /// # Safety
    ///
    /// Every slot must be vacant.
    pub(crate) unsafe fn reallocate(&mut self) {
        let fresh = allocate_slots::<T, A>(self.capacity, &self.alloc);
        unsafe { deallocate_slots::<T, A>(self.buffer, self.capacity, &self.alloc) };
        self.buffer = fresh;
    }
}

impl<T, A: RawAlloc> Drop for RingStorage<T, A> {
    fn drop(&mut self) {
        // Values are dropped by the owning ring, which knows the live range.
        unsafe { deallocate_slots::<T, A>(self.buffer, self.capacity, &self.alloc) };
    }
}

fn assert_capacity(capacity: usize) {
    assert!(capacity > 0, "capacity must be greater than 0");
    assert!(
        capacity <= MAX_CAPACITY,
        "capacity {capacity} exceeds the maximum of {MAX_CAPACITY}"
    );
}

fn slot_layout<T>(capacity: usize) -> Layout {
    Layout::array::<Slot<T>>(capacity).expect("slot array layout overflow")
}

fn allocate_slots<T, A: RawAlloc>(capacity: usize, alloc: &A) -> NonNull<Slot<T>> {
    let layout = slot_layout::<T>(capacity);
    if layout.size() == 0 {
        return NonNull::dangling();
    }
    alloc.allocate(layout).cast()
}

/// # Safety
///
/// `buffer` must come from `allocate_slots` with the same capacity and
/// allocator, and must not be used afterwards.
unsafe fn deallocate_slots<T, A: RawAlloc>(buffer: NonNull<Slot<T>>, capacity: usize, alloc: &A) {
    let layout = slot_layout::<T>(capacity);
    if layout.size() != 0 {
        unsafe { alloc.deallocate(buffer.cast(), layout) };
    }
}
