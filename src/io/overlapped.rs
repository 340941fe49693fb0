//! Native overlapped-operation descriptor
//!
//! [`Overlapped`] has the exact layout of the Win32 `OVERLAPPED` structure:
//! a status word, a transferred-byte word, the 64-bit file offset split into
//! two 32-bit halves, and an event handle. The IOCP backend hands a pointer to
//! it straight to `ReadFile`/`WriteFile` and gets the same pointer back in the
//! completion packet. The Unix backend fills in the same fields itself.
//!
//! All fields are atomics (same layout as the plain integers) because the
//! kernel or the completing backend writes them while other threads hold a
//! shared reference.

use std::sync::atomic::{AtomicIsize, AtomicU32, AtomicUsize, Ordering};

/// `STATUS_PENDING`: the operation has not finished yet
pub const STATUS_PENDING: usize = 0x0000_0103;

/// `STATUS_SUCCESS`
pub const STATUS_SUCCESS: usize = 0;

/// Split a 64-bit offset into its (low, high) 32-bit halves
#[inline]
pub fn split_offset(offset: u64) -> (u32, u32) {
    (offset as u32, (offset >> 32) as u32)
}

/// Join (low, high) 32-bit halves into a 64-bit offset
#[inline]
pub fn join_offset(low: u32, high: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct Overlapped {
    internal: AtomicUsize,
    internal_high: AtomicUsize,
    offset: AtomicU32,
    offset_high: AtomicU32,
    event: AtomicIsize,
}

impl Overlapped {
    /// Reset the descriptor for a new operation at `offset`
    pub fn prepare(&self, offset: u64) {
        let (low, high) = split_offset(offset);
        self.internal_high.store(0, Ordering::Relaxed);
        self.offset.store(low, Ordering::Relaxed);
        self.offset_high.store(high, Ordering::Relaxed);
        self.internal.store(STATUS_PENDING, Ordering::Release);
    }

    /// Record the final status, as the kernel does when an operation finishes
    pub fn complete(&self, status: usize, transferred: usize) {
        self.internal_high.store(transferred, Ordering::Relaxed);
        self.internal.store(status, Ordering::Release);
    }

    pub fn offset(&self) -> u64 {
        join_offset(
            self.offset.load(Ordering::Relaxed),
            self.offset_high.load(Ordering::Relaxed),
        )
    }

    pub fn status(&self) -> usize {
        self.internal.load(Ordering::Acquire)
    }

    pub fn transferred(&self) -> usize {
        self.internal_high.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self) -> bool {
        self.status() == STATUS_PENDING
    }

    pub fn set_event_handle(&self, handle: isize) {
        self.event.store(handle, Ordering::Relaxed);
    }

    pub fn event_handle(&self) -> isize {
        self.event.load(Ordering::Relaxed)
    }

    /// Raw pointer for native calls
    pub fn as_ptr(&self) -> *mut Overlapped {
        self as *const Overlapped as *mut Overlapped
    }
}
