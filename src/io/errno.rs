//! Native status to portable errno translation
//!
//! The portable error space is POSIX errno. Codes without a mapping pass
//! through unchanged, so callers must treat the result as an open set.

/// Win32 system error codes understood by the translator
pub mod win32 {
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_PATH_NOT_FOUND: u32 = 3;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
    pub const ERROR_INVALID_DATA: u32 = 13;
    pub const ERROR_OUTOFMEMORY: u32 = 14;
    pub const ERROR_INVALID_DRIVE: u32 = 15;
    pub const ERROR_NOT_SAME_DEVICE: u32 = 17;
    pub const ERROR_WRITE_PROTECT: u32 = 19;
    pub const ERROR_BAD_UNIT: u32 = 20;
    pub const ERROR_CRC: u32 = 23;
    pub const ERROR_SHARING_VIOLATION: u32 = 32;
    pub const ERROR_LOCK_VIOLATION: u32 = 33;
    pub const ERROR_SHARING_BUFFER_EXCEEDED: u32 = 36;
    pub const ERROR_HANDLE_EOF: u32 = 38;
    pub const ERROR_HANDLE_DISK_FULL: u32 = 39;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_FILE_EXISTS: u32 = 80;
    pub const ERROR_CANNOT_MAKE: u32 = 82;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_NO_PROC_SLOTS: u32 = 89;
    pub const ERROR_INVALID_AT_INTERRUPT_TIME: u32 = 104;
    pub const ERROR_BROKEN_PIPE: u32 = 109;
    pub const ERROR_OPEN_FAILED: u32 = 110;
    pub const ERROR_DISK_FULL: u32 = 112;
    pub const ERROR_NO_MORE_SEARCH_HANDLES: u32 = 113;
    pub const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
    pub const ERROR_INVALID_NAME: u32 = 123;
    pub const ERROR_WAIT_NO_CHILDREN: u32 = 128;
    pub const ERROR_CHILD_NOT_COMPLETE: u32 = 129;
    pub const ERROR_NEGATIVE_SEEK: u32 = 131;
    pub const ERROR_DIR_NOT_EMPTY: u32 = 145;
    pub const ERROR_SIGNAL_REFUSED: u32 = 156;
    pub const ERROR_BAD_PATHNAME: u32 = 161;
    pub const ERROR_SIGNAL_PENDING: u32 = 162;
    pub const ERROR_MAX_THRDS_REACHED: u32 = 164;
    pub const ERROR_BUSY: u32 = 170;
    pub const ERROR_ALREADY_EXISTS: u32 = 183;
    pub const ERROR_NO_SIGNAL_SENT: u32 = 205;
    pub const ERROR_FILENAME_EXCED_RANGE: u32 = 206;
    pub const ERROR_META_EXPANSION_TOO_LONG: u32 = 208;
    pub const ERROR_INVALID_SIGNAL_NUMBER: u32 = 209;
    pub const ERROR_THREAD_1_INACTIVE: u32 = 210;
    pub const ERROR_BAD_PIPE: u32 = 230;
    pub const ERROR_PIPE_BUSY: u32 = 231;
    pub const ERROR_NO_DATA: u32 = 232;
    pub const ERROR_MORE_DATA: u32 = 234;
    pub const ERROR_DIRECTORY: u32 = 267;
    pub const ERROR_NOT_OWNER: u32 = 288;
    pub const ERROR_PIPE_CONNECTED: u32 = 535;
    pub const ERROR_OPERATION_ABORTED: u32 = 995;
    pub const ERROR_IO_PENDING: u32 = 997;
    pub const ERROR_NOACCESS: u32 = 998;
    pub const ERROR_FILE_INVALID: u32 = 1006;
    pub const ERROR_NO_TOKEN: u32 = 1008;
    pub const ERROR_PROCESS_ABORTED: u32 = 1067;
    pub const ERROR_END_OF_MEDIA: u32 = 1100;
    pub const ERROR_BEGINNING_OF_MEDIA: u32 = 1102;
    pub const ERROR_SETMARK_DETECTED: u32 = 1103;
    pub const ERROR_NO_DATA_DETECTED: u32 = 1104;
    pub const ERROR_IO_DEVICE: u32 = 1117;
    pub const ERROR_EOM_OVERFLOW: u32 = 1129;
    pub const ERROR_POSSIBLE_DEADLOCK: u32 = 1131;
    pub const ERROR_BAD_DEVICE: u32 = 1200;
    pub const ERROR_BAD_USERNAME: u32 = 2202;
    pub const ERROR_OPEN_FILES: u32 = 2401;
    pub const ERROR_ACTIVE_CONNECTIONS: u32 = 2402;
    pub const ERROR_DEVICE_IN_USE: u32 = 2404;
}

/// Map a Win32 error code to errno
///
/// Unmapped codes are returned as-is.
pub fn win32_to_errno(code: u32) -> i32 {
    use win32::*;

    match code {
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => libc::ENOENT,
        ERROR_ACCESS_DENIED => libc::EACCES,
        ERROR_INVALID_HANDLE => libc::EBADF,
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => libc::ENOMEM,
        ERROR_INVALID_DATA => libc::EINVAL,
        ERROR_INVALID_DRIVE | ERROR_BAD_UNIT | ERROR_BAD_DEVICE => libc::ENODEV,
        ERROR_NOT_SAME_DEVICE => libc::EXDEV,
        ERROR_WRITE_PROTECT => libc::EROFS,
        ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION => libc::EACCES,
        ERROR_SHARING_BUFFER_EXCEEDED => libc::ENOLCK,
        ERROR_HANDLE_EOF => libc::ENXIO,
        ERROR_HANDLE_DISK_FULL | ERROR_DISK_FULL => libc::ENOSPC,
        ERROR_END_OF_MEDIA | ERROR_EOM_OVERFLOW | ERROR_NO_DATA_DETECTED => libc::ENOSPC,
        ERROR_NOT_SUPPORTED | ERROR_CALL_NOT_IMPLEMENTED => libc::ENOSYS,
        ERROR_FILE_EXISTS | ERROR_ALREADY_EXISTS => libc::EEXIST,
        ERROR_CANNOT_MAKE | ERROR_NOT_OWNER => libc::EPERM,
        ERROR_INVALID_PARAMETER
        | ERROR_FILENAME_EXCED_RANGE
        | ERROR_META_EXPANSION_TOO_LONG
        | ERROR_INVALID_SIGNAL_NUMBER
        | ERROR_THREAD_1_INACTIVE
        | ERROR_BAD_PIPE
        | ERROR_NO_TOKEN
        | ERROR_BAD_USERNAME
        | ERROR_NEGATIVE_SEEK => libc::EINVAL,
        ERROR_NO_PROC_SLOTS
        | ERROR_MAX_THRDS_REACHED
        | ERROR_MORE_DATA
        | ERROR_OPEN_FILES
        | ERROR_ACTIVE_CONNECTIONS
        | ERROR_DEVICE_IN_USE => libc::EAGAIN,
        ERROR_BROKEN_PIPE | ERROR_NO_DATA => libc::EPIPE,
        ERROR_OPEN_FAILED
        | ERROR_SIGNAL_REFUSED
        | ERROR_NO_SIGNAL_SENT
        | ERROR_IO_DEVICE
        | ERROR_CRC => libc::EIO,
        ERROR_NO_MORE_SEARCH_HANDLES => libc::ENFILE,
        ERROR_INVALID_NAME | ERROR_BAD_PATHNAME => libc::ENOENT,
        ERROR_WAIT_NO_CHILDREN => libc::ECHILD,
        ERROR_CHILD_NOT_COMPLETE
        | ERROR_SIGNAL_PENDING
        | ERROR_BUSY
        | ERROR_PIPE_BUSY
        | ERROR_PIPE_CONNECTED => libc::EBUSY,
        ERROR_DIR_NOT_EMPTY => libc::ENOTEMPTY,
        ERROR_DIRECTORY => libc::ENOTDIR,
        ERROR_PROCESS_ABORTED | ERROR_NOACCESS => libc::EFAULT,
        ERROR_INVALID_AT_INTERRUPT_TIME => libc::EINTR,
        ERROR_BEGINNING_OF_MEDIA | ERROR_SETMARK_DETECTED => libc::ESPIPE,
        ERROR_POSSIBLE_DEADLOCK => libc::EDEADLK,
        ERROR_FILE_INVALID => libc::ENXIO,
        ERROR_OPERATION_ABORTED => libc::ECANCELED,
        other => other as i32,
    }
}

/// Translate a status reported by the native backend into errno
///
/// The IOCP backend reports Win32 codes; the Unix backend already reports
/// errno and passes through.
#[cfg(windows)]
pub fn translate(native: i32) -> i32 {
    win32_to_errno(native as u32)
}

/// Translate a status reported by the native backend into errno
///
/// The IOCP backend reports Win32 codes; the Unix backend already reports
/// errno and passes through.
#[cfg(not(windows))]
pub fn translate(native: i32) -> i32 {
    native
}
