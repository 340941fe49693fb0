//! Logical IO requests
//!
//! Requests are allocated and pooled by the caller. The engine only attaches
//! a [`ControlBlock`] to each pooled request and reads/writes the
//! per-request result fields.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::warn;

use super::aligned_buffer::AlignedBuffer;
use super::control_block::{Completion, ControlBlock};
use super::error::{EngineError, EngineResult};

/// Data direction of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
    /// Full flush of file data and metadata
    Sync,
    /// Data-only flush
    DataSync,
    /// Ranged flush
    SyncFileRange,
    /// Discard a range
    Trim,
}

impl Direction {
    /// Directions served by the synchronous flush path
    pub fn is_sync(self) -> bool {
        matches!(
            self,
            Direction::Sync | Direction::DataSync | Direction::SyncFileRange
        )
    }
}

#[derive(Debug)]
pub struct IoRequest {
    index: usize,
    direction: Direction,
    offset: u64,
    xfer_len: usize,
    // Leaked instead of freed if the request is dropped mid-operation
    buffer: ManuallyDrop<AlignedBuffer>,
    error: i32,
    resid: usize,
    control: Option<Arc<ControlBlock>>,
}

impl IoRequest {
    /// Create a pooled request for slot `index`
    pub fn new(index: usize, buffer: AlignedBuffer) -> Self {
        Self {
            index,
            direction: Direction::Read,
            offset: 0,
            xfer_len: 0,
            buffer: ManuallyDrop::new(buffer),
            error: 0,
            resid: 0,
            control: None,
        }
    }

    /// Describe the next operation for this request
    ///
    /// Clears the result of the previous operation.
    pub fn prepare(&mut self, direction: Direction, offset: u64, len: usize) -> EngineResult<()> {
        if self.is_in_flight() {
            return Err(EngineError::ContractViolation(
                "request reused while its operation is outstanding",
            ));
        }
        if len > self.buffer.capacity() {
            return Err(EngineError::BufferSize {
                size: len,
                capacity: self.buffer.capacity(),
            });
        }

        self.direction = direction;
        self.offset = offset;
        self.xfer_len = len;
        self.error = 0;
        self.resid = 0;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Requested transfer length
    pub fn xfer_len(&self) -> usize {
        self.xfer_len
    }

    /// Portable errno of the last operation, 0 on success
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Bytes of the last transfer that did not complete
    pub fn resid(&self) -> usize {
        self.resid
    }

    /// Bytes actually transferred by the last operation
    pub fn transferred(&self) -> usize {
        self.xfer_len - self.resid
    }

    pub fn buffer(&self) -> &AlignedBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut AlignedBuffer {
        &mut self.buffer
    }

    pub fn control_block(&self) -> Option<&Arc<ControlBlock>> {
        self.control.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.control.as_ref().is_some_and(|cb| cb.is_in_flight())
    }

    pub(crate) fn xfer_buf(&self) -> &[u8] {
        &self.buffer.as_full_slice()[..self.xfer_len]
    }

    pub(crate) fn xfer_buf_mut(&mut self) -> &mut [u8] {
        let len = self.xfer_len;
        &mut self.buffer.as_mut_slice()[..len]
    }

    pub(crate) fn attach(&mut self, control: Arc<ControlBlock>) {
        self.control = Some(control);
    }

    pub(crate) fn detach(&mut self) -> Option<Arc<ControlBlock>> {
        self.control.take()
    }

    pub(crate) fn set_result(&mut self, error: i32, resid: usize) {
        self.error = error;
        self.resid = resid;
    }

    pub(crate) fn apply(&mut self, completion: Completion) {
        self.error = completion.error;
        self.resid = completion.resid.min(self.xfer_len);
    }
}

impl Drop for IoRequest {
    fn drop(&mut self) {
        if self.is_in_flight() {
            // The native operation may still write into the buffer and hand
            // back the control block, so neither can be freed.
            warn!(
                request = self.index,
                offset = self.offset,
                "request dropped with an operation outstanding, leaking its buffer"
            );
            std::mem::forget(self.control.take());
            return;
        }
        // Safety: the buffer is dropped exactly once, here
        unsafe { ManuallyDrop::drop(&mut self.buffer) };
    }
}
