//! Unix backend
//!
//! Unix has no overlapped file IO, so reads and writes are issued with
//! positional IO at submit time. Every accepted operation then posts a packet
//! to the target's port, successful or not, just as an overlapped handle
//! posts to its completion port even when the call finished synchronously.
//! The listener drains this port exactly as it drains an IOCP.
//!
//! Errors returned by the positional call itself are synchronous failures and
//! post nothing. A zero-byte read at or past the end of the target is treated
//! as an operation that failed in flight and posts `ENXIO`.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::IntoRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Dequeued, Packet};
use crate::io::config::TargetOptions;
use crate::io::control_block::ControlBlock;
use crate::io::event::Event;
use crate::io::overlapped::STATUS_SUCCESS;

fn os_code(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// True for FIFOs and sockets, which have no positional IO
pub fn is_pipe(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| {
            let file_type = meta.file_type();
            file_type.is_fifo() || file_type.is_socket()
        })
        .unwrap_or(false)
}

#[derive(Default)]
struct PortQueue {
    packets: VecDeque<Packet>,
    woken: bool,
}

/// In-process completion port
#[derive(Default)]
pub struct Port {
    queue: Mutex<PortQueue>,
    ready: Condvar,
}

impl Port {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, packet: Packet) {
        self.queue.lock().packets.push_back(packet);
        self.ready.notify_one();
    }

    /// Release one pending or future `dequeue` without a packet
    pub fn wake(&self) {
        self.queue.lock().woken = true;
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for the next packet
    ///
    /// A timeout too large to represent as a deadline waits until a packet
    /// is posted or the port is woken.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.queue.lock();
        loop {
            if let Some(packet) = queue.packets.pop_front() {
                return Dequeued::Packet(packet);
            }
            if std::mem::take(&mut queue.woken) {
                return Dequeued::Woken;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut queue, deadline).timed_out() {
                        return queue
                            .packets
                            .pop_front()
                            .map_or(Dequeued::Timeout, Dequeued::Packet);
                    }
                }
                None => self.ready.wait(&mut queue),
            }
        }
    }

    /// Packets posted but not yet dequeued
    pub fn pending(&self) -> usize {
        self.queue.lock().packets.len()
    }
}

/// Per-request completion signal (manual reset)
#[derive(Debug)]
pub struct CompletionSignal(Event);

impl CompletionSignal {
    pub fn new() -> io::Result<Self> {
        Ok(Self(Event::manual_reset()))
    }

    pub fn set(&self) {
        self.0.set();
    }

    pub fn reset(&self) {
        self.0.reset();
    }

    pub fn is_set(&self) -> bool {
        self.0.is_set()
    }

    /// No kernel object backs the signal on Unix
    pub fn raw(&self) -> isize {
        0
    }
}

/// Targeted cancellation capability
///
/// Positional IO finishes before submit returns, so nothing is ever
/// outstanding at the OS level and the capability is never available.
#[derive(Debug, Clone, Copy)]
pub struct CancelSupport;

impl CancelSupport {
    pub fn resolve() -> Option<Self> {
        None
    }

    pub fn cancel(&self, _file: &NativeFile, _block: &ControlBlock) -> bool {
        false
    }
}

/// An open target file
pub struct NativeFile {
    file: File,
    port: Option<Arc<Port>>,
}

impl NativeFile {
    pub fn open(path: &Path, opts: &TargetOptions) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options
            .read(true)
            .write(opts.writable())
            .create(opts.create && opts.writable());

        let mut flags = 0;
        if opts.sync_io {
            flags |= libc::O_DSYNC;
        }
        #[cfg(target_os = "linux")]
        {
            if opts.direct {
                flags |= libc::O_DIRECT;
            }
        }
        options.custom_flags(flags);

        let file = options.open(path)?;

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;

            let advice = match opts.pattern {
                crate::io::config::AccessPattern::Sequential => libc::POSIX_FADV_SEQUENTIAL,
                crate::io::config::AccessPattern::Random => libc::POSIX_FADV_RANDOM,
            };
            // Safety: fd is open for the lifetime of `file`
            let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice) };
            if rc != 0 {
                tracing::debug!(rc, "posix_fadvise rejected access pattern hint");
            }
        }

        Ok(Self { file, port: None })
    }

    /// Associate the file with a fresh completion port
    pub fn associate(&mut self) -> io::Result<Arc<Port>> {
        let port = Arc::new(Port::new());
        self.port = Some(port.clone());
        Ok(port)
    }

    fn port(&self) -> Result<&Arc<Port>, i32> {
        self.port.as_ref().ok_or(libc::EBADF)
    }

    fn post(port: &Port, block: &Arc<ControlBlock>, transferred: usize, error: Option<i32>) {
        let status = error.map_or(STATUS_SUCCESS, |code| code as usize);
        block.overlapped().complete(status, transferred);
        block.signal().set();
        port.post(Packet {
            block: block.clone(),
            transferred,
            error,
        });
    }

    /// Issue a read into `buf` at the block's offset
    pub fn start_read(&self, block: &Arc<ControlBlock>, buf: &mut [u8]) -> Result<(), i32> {
        let port = self.port()?;
        let offset = block.overlapped().offset();
        let read = loop {
            match self.file.read_at(buf, offset) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match read {
            Ok(0) if !buf.is_empty() => Self::post(port, block, 0, Some(libc::ENXIO)),
            Ok(n) => Self::post(port, block, n, None),
            Err(e) => return Err(os_code(&e)),
        }
        Ok(())
    }

    /// Issue a write of `buf` at the block's offset
    pub fn start_write(&self, block: &Arc<ControlBlock>, buf: &[u8]) -> Result<(), i32> {
        let port = self.port()?;
        let offset = block.overlapped().offset();
        let written = loop {
            match self.file.write_at(buf, offset) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match written {
            Ok(n) => Self::post(port, block, n, None),
            Err(e) => return Err(os_code(&e)),
        }
        Ok(())
    }

    /// Flush file data and metadata to stable storage
    pub fn flush(&self) -> Result<(), i32> {
        self.file.sync_all().map_err(|e| os_code(&e))
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Close the descriptor, reporting close(2) failures
    pub fn close(self) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        // Safety: fd was just released from the File and is closed once
        if unsafe { libc::close(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
