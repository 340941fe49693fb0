//! IOCP backend for Windows
//!
//! Files are opened with `FILE_FLAG_OVERLAPPED` and associated with their
//! own I/O completion port. The control block's [`Overlapped`] descriptor is
//! passed to the kernel as-is and comes back in the completion packet.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use windows::core::{s, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, GetFileSizeEx, ReadFile, WriteFile, FILE_FLAG_NO_BUFFERING,
    FILE_FLAG_OVERLAPPED, FILE_FLAG_POSIX_SEMANTICS, FILE_FLAG_RANDOM_ACCESS,
    FILE_FLAG_SEQUENTIAL_SCAN, FILE_FLAG_WRITE_THROUGH, FILE_GENERIC_READ, FILE_GENERIC_WRITE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_ALWAYS, OPEN_EXISTING,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Threading::{CreateEventW, ResetEvent, WaitForSingleObject};
use windows::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
};

use super::{Dequeued, Packet};
use crate::io::config::{AccessPattern, TargetOptions};
use crate::io::control_block::ControlBlock;
use crate::io::errno::win32::{ERROR_IO_PENDING, ERROR_NOT_SUPPORTED};
use crate::io::overlapped::Overlapped;

const WAIT_TIMEOUT: u32 = 258;
const INFINITE: u32 = u32::MAX;

const _: () = assert!(std::mem::size_of::<Overlapped>() == std::mem::size_of::<OVERLAPPED>());

/// A Send-safe wrapper for Windows HANDLE
///
/// File, port and event handles are process-wide kernel objects; the
/// windows crate marks HANDLE as !Send only because it wraps a pointer.
#[derive(Clone, Copy)]
struct SendableHandle(isize);

impl SendableHandle {
    fn new(handle: HANDLE) -> Self {
        Self(handle.0 as isize)
    }

    fn as_handle(self) -> HANDLE {
        HANDLE(self.0 as *mut std::ffi::c_void)
    }
}

// SAFETY: see type docs
unsafe impl Send for SendableHandle {}
unsafe impl Sync for SendableHandle {}

/// Extract the Win32 code carried by a windows::core::Error
fn win32_code(err: &windows::core::Error) -> u32 {
    let hr = err.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

fn to_io(err: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(win32_code(&err) as i32)
}

/// Named pipes live under `\\.\pipe\`
pub fn is_pipe(path: &Path) -> bool {
    path.to_string_lossy()
        .to_ascii_lowercase()
        .starts_with(r"\\.\pipe\")
}

/// Completion port associated with one target
pub struct Port {
    handle: SendableHandle,
}

impl Port {
    /// Wait up to `timeout` for the next packet
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        let millis = timeout.as_millis().min((INFINITE - 1) as u128) as u32;
        let mut transferred: u32 = 0;
        let mut key: usize = 0;
        let mut ovl: *mut OVERLAPPED = ptr::null_mut();

        let result = unsafe {
            GetQueuedCompletionStatus(
                self.handle.as_handle(),
                &mut transferred,
                &mut key,
                &mut ovl,
                millis,
            )
        };

        let error = match result {
            Ok(()) => None,
            Err(e) => Some(win32_code(&e)),
        };

        if ovl.is_null() {
            return match error {
                None => Dequeued::Woken,
                Some(WAIT_TIMEOUT) => Dequeued::Timeout,
                Some(code) => Dequeued::Failed(io::Error::from_raw_os_error(code as i32)),
            };
        }

        // Safety: every OVERLAPPED on this port was lent by `start_read` or
        // `start_write` and its packet is delivered exactly once.
        let block = unsafe { ControlBlock::reclaim(ovl as *const Overlapped) };
        Dequeued::Packet(Packet {
            block,
            transferred: transferred as usize,
            error: error.map(|code| code as i32),
        })
    }
}

impl Port {
    /// Release one pending or future `dequeue` without a packet
    pub fn wake(&self) {
        // A null OVERLAPPED packet stays queued until a waiter takes it
        if let Err(e) = unsafe { PostQueuedCompletionStatus(self.handle.as_handle(), 0, 0, None) } {
            tracing::warn!(error = %e, "failed to wake completion port");
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle.as_handle());
        }
    }
}

/// Per-request manual-reset event stored in `OVERLAPPED.hEvent`
pub struct CompletionSignal {
    handle: SendableHandle,
}

impl CompletionSignal {
    pub fn new() -> io::Result<Self> {
        let handle = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }.map_err(to_io)?;
        Ok(Self {
            handle: SendableHandle::new(handle),
        })
    }

    pub fn reset(&self) {
        unsafe {
            let _ = ResetEvent(self.handle.as_handle());
        }
    }

    pub fn is_set(&self) -> bool {
        unsafe { WaitForSingleObject(self.handle.as_handle(), 0) == WAIT_OBJECT_0 }
    }

    pub fn raw(&self) -> isize {
        self.handle.0
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle.as_handle());
        }
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompletionSignal").field(&self.handle.0).finish()
    }
}

type CancelIoExFn = unsafe extern "system" fn(HANDLE, *const OVERLAPPED) -> BOOL;

/// `CancelIoEx`, looked up at runtime (absent before Vista)
#[derive(Clone, Copy)]
pub struct CancelSupport {
    cancel_io_ex: CancelIoExFn,
}

impl CancelSupport {
    pub fn resolve() -> Option<Self> {
        let kernel32 = unsafe { GetModuleHandleA(s!("kernel32.dll")) }.ok()?;
        let proc = unsafe { GetProcAddress(kernel32, s!("CancelIoEx")) }?;
        // Safety: CancelIoEx has exactly this signature
        let cancel_io_ex = unsafe {
            std::mem::transmute::<unsafe extern "system" fn() -> isize, CancelIoExFn>(proc)
        };
        Some(Self { cancel_io_ex })
    }

    pub fn cancel(&self, file: &NativeFile, block: &ControlBlock) -> bool {
        let ovl = block.overlapped().as_ptr() as *const OVERLAPPED;
        unsafe { (self.cancel_io_ex)(file.handle.as_handle(), ovl) }.as_bool()
    }
}

impl std::fmt::Debug for CancelSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelSupport(CancelIoEx)")
    }
}

/// An open overlapped target handle
pub struct NativeFile {
    handle: SendableHandle,
}

impl NativeFile {
    pub fn open(path: &Path, opts: &TargetOptions) -> io::Result<Self> {
        let wide_path: Vec<u16> = OsStr::new(path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let mut flags = FILE_FLAG_POSIX_SEMANTICS | FILE_FLAG_OVERLAPPED;
        if opts.direct {
            flags |= FILE_FLAG_NO_BUFFERING;
        }
        if opts.sync_io {
            flags |= FILE_FLAG_WRITE_THROUGH;
        }
        flags |= match opts.pattern {
            AccessPattern::Sequential => FILE_FLAG_SEQUENTIAL_SCAN,
            AccessPattern::Random => FILE_FLAG_RANDOM_ACCESS,
        };

        let access = if opts.writable() {
            (FILE_GENERIC_READ | FILE_GENERIC_WRITE).0
        } else {
            FILE_GENERIC_READ.0
        };
        let disposition = if opts.create { OPEN_ALWAYS } else { OPEN_EXISTING };

        let handle = unsafe {
            CreateFileW(
                PCWSTR::from_raw(wide_path.as_ptr()),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                disposition,
                flags,
                None,
            )
        }
        .map_err(to_io)?;

        Ok(Self {
            handle: SendableHandle::new(handle),
        })
    }

    /// Create a completion port bound to this handle
    pub fn associate(&mut self) -> io::Result<Arc<Port>> {
        let port = unsafe { CreateIoCompletionPort(self.handle.as_handle(), None, 0, 0) }
            .map_err(to_io)?;
        Ok(Arc::new(Port {
            handle: SendableHandle::new(port),
        }))
    }

    fn accepted(result: windows::core::Result<()>) -> Result<(), i32> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => match win32_code(&e) {
                ERROR_IO_PENDING => Ok(()),
                code => Err(code as i32),
            },
        }
    }

    /// Hand the block to the kernel for one operation
    ///
    /// The lent reference comes back through the completion packet, or is
    /// reclaimed here when the call is rejected and no packet will follow.
    fn issue(
        block: &Arc<ControlBlock>,
        call: impl FnOnce(*mut OVERLAPPED) -> windows::core::Result<()>,
    ) -> Result<(), i32> {
        let ovl = ControlBlock::lend(block);
        let result = Self::accepted(call(ovl as *mut OVERLAPPED));
        if result.is_err() {
            // Safety: the kernel rejected the operation, so nothing else
            // holds the lent reference.
            drop(unsafe { ControlBlock::reclaim(ovl) });
        }
        result
    }

    /// Issue an overlapped read into `buf`
    pub fn start_read(&self, block: &Arc<ControlBlock>, buf: &mut [u8]) -> Result<(), i32> {
        let handle = self.handle.as_handle();
        // Safety: the lent block keeps the descriptor alive, and a request
        // dropped while in flight leaks its buffer instead of freeing it.
        Self::issue(block, |ovl| unsafe { ReadFile(handle, Some(buf), None, Some(ovl)) })
    }

    /// Issue an overlapped write of `buf`
    pub fn start_write(&self, block: &Arc<ControlBlock>, buf: &[u8]) -> Result<(), i32> {
        let handle = self.handle.as_handle();
        // Safety: as for start_read
        Self::issue(block, |ovl| unsafe { WriteFile(handle, Some(buf), None, Some(ovl)) })
    }

    pub fn flush(&self) -> Result<(), i32> {
        unsafe { FlushFileBuffers(self.handle.as_handle()) }
            .map_err(|e| win32_code(&e) as i32)
    }

    pub fn size(&self) -> io::Result<u64> {
        let mut size: i64 = 0;
        unsafe { GetFileSizeEx(self.handle.as_handle(), &mut size) }.map_err(to_io)?;
        u64::try_from(size).map_err(|_| io::Error::from_raw_os_error(ERROR_NOT_SUPPORTED as i32))
    }

    pub fn close(self) -> io::Result<()> {
        let handle = self.handle;
        std::mem::forget(self);
        unsafe { CloseHandle(handle.as_handle()) }.map_err(to_io)
    }
}

impl Drop for NativeFile {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle.as_handle());
        }
    }
}
