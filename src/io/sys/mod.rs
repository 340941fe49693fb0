//! Native file handles and the completion-notification facility
//!
//! - Windows: overlapped file handles associated with an I/O completion port
//! - Unix: positional IO with an in-process completion port
//!
//! Both backends export the same surface: `NativeFile`, `Port`,
//! `CompletionSignal`, `CancelSupport` and `is_pipe`.

use std::sync::Arc;

use super::control_block::ControlBlock;

#[cfg(windows)]
mod iocp;
#[cfg(windows)]
pub use iocp::*;

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::*;

/// A completion delivered by the port
#[derive(Debug)]
pub struct Packet {
    /// Control block of the finished operation
    pub block: Arc<ControlBlock>,
    /// Bytes transferred
    pub transferred: usize,
    /// Native failure code, `None` on success
    pub error: Option<i32>,
}

/// Outcome of one bounded wait on the port
#[derive(Debug)]
pub enum Dequeued {
    Packet(Packet),
    Timeout,
    /// Released by `Port::wake` with no packet
    Woken,
    Failed(std::io::Error),
}
