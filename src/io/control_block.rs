//! Per-request control block
//!
//! One control block accompanies each pooled [`IoRequest`](super::IoRequest).
//! It is created when the request enters the pool and dropped when the
//! request leaves it. While an operation is outstanding the kernel (or the
//! Unix backend) and the listener thread reach it through a shared
//! reference; only the pool owner ever frees it.
//!
//! Hand-off between the listener and the harvest path goes through the
//! `complete` flag: the listener writes the result fields and then sets the
//! flag with release ordering, the harvester clears it with acquire ordering
//! before reading them. Every field has a single writer at any given time.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::errno;
use super::error::{EngineError, EngineResult};
use super::overlapped::Overlapped;
use super::sys::CompletionSignal;

/// Result of a finished operation, as moved onto the logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Portable errno, 0 on success
    pub error: i32,
    /// Bytes of the requested transfer not completed
    pub resid: usize,
}

#[repr(C)]
pub struct ControlBlock {
    // Must stay the first field: native completions hand back a pointer to
    // it and the block is recovered by casting.
    overlapped: Overlapped,
    signal: CompletionSignal,
    request: usize,
    requested: AtomicUsize,
    error: AtomicI32,
    resid: AtomicUsize,
    complete: AtomicBool,
    in_flight: AtomicBool,
}

impl ControlBlock {
    /// Create the control block for the pool slot `request`
    pub(crate) fn new(request: usize) -> EngineResult<Arc<Self>> {
        let signal = CompletionSignal::new()
            .map_err(|e| EngineError::Allocation(format!("completion signal: {e}")))?;

        let block = Arc::new(Self {
            overlapped: Overlapped::default(),
            signal,
            request,
            requested: AtomicUsize::new(0),
            error: AtomicI32::new(0),
            resid: AtomicUsize::new(0),
            complete: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        });
        block.overlapped.set_event_handle(block.signal.raw());
        Ok(block)
    }

    /// Pool slot index of the logical request this block belongs to
    pub fn request_index(&self) -> usize {
        self.request
    }

    pub fn overlapped(&self) -> &Overlapped {
        &self.overlapped
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// True from submission until the harvest path consumes the completion
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True once the listener has recorded a result not yet harvested
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn requested(&self) -> usize {
        self.requested.load(Ordering::Relaxed)
    }

    /// Prepare the descriptor for a new native operation
    pub(crate) fn arm(&self, offset: u64, len: usize) -> EngineResult<()> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(EngineError::ContractViolation(
                "control block already has an operation outstanding",
            ));
        }
        self.requested.store(len, Ordering::Relaxed);
        self.overlapped.prepare(offset);
        Ok(())
    }

    /// Release an armed block whose operation was never accepted
    pub(crate) fn disarm(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Record the outcome of a delivered completion (listener side)
    ///
    /// `native_error` is the backend's failure code, `None` on success.
    pub(crate) fn finish(&self, transferred: usize, native_error: Option<i32>) {
        let requested = self.requested();
        match native_error {
            None => {
                self.error.store(0, Ordering::Relaxed);
                self.resid
                    .store(requested.saturating_sub(transferred), Ordering::Relaxed);
            }
            Some(code) => {
                self.error.store(errno::translate(code), Ordering::Relaxed);
                self.resid.store(requested, Ordering::Relaxed);
            }
        }
        self.complete.store(true, Ordering::Release);
    }

    /// Consume a recorded completion (harvest side)
    ///
    /// Returns `None` if nothing completed since the last call. A returned
    /// completion leaves the block idle and ready for reuse.
    pub(crate) fn take_completion(&self) -> Option<Completion> {
        if !self.complete.swap(false, Ordering::AcqRel) {
            return None;
        }

        let completion = Completion {
            error: self.error.load(Ordering::Relaxed),
            resid: self.resid.load(Ordering::Relaxed),
        };
        self.signal.reset();
        self.in_flight.store(false, Ordering::Release);
        Some(completion)
    }

    /// Lend one strong reference to a native operation
    ///
    /// The returned pointer is both the descriptor handed to the kernel and
    /// the leaked `Arc`, since `overlapped` is the first field. It must be
    /// returned through [`ControlBlock::reclaim`] exactly once.
    #[cfg(windows)]
    pub(crate) fn lend(block: &Arc<Self>) -> *const Overlapped {
        Arc::into_raw(block.clone()) as *const Overlapped
    }

    /// Take back a reference lent by [`ControlBlock::lend`]
    ///
    /// # Safety
    /// `ovl` must come from `lend` and must not have been reclaimed already.
    #[cfg(windows)]
    pub(crate) unsafe fn reclaim(ovl: *const Overlapped) -> Arc<Self> {
        // Safety: guaranteed by the caller
        unsafe { Arc::from_raw(ovl as *const ControlBlock) }
    }
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("request", &self.request)
            .field("offset", &self.overlapped.offset())
            .field("in_flight", &self.is_in_flight())
            .field("complete", &self.is_complete())
            .finish()
    }
}
