//! Page-aligned transfer buffers
//!
//! Unbuffered IO (`FILE_FLAG_NO_BUFFERING`, `O_DIRECT`) requires the transfer
//! address to be sector aligned, so every request buffer is page aligned.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::error::{EngineError, EngineResult};

/// Alignment and size granularity of transfer buffers (4KB)
pub const PAGE_SIZE: usize = 4096;

/// A buffer aligned to PAGE_SIZE
///
/// `len` tracks how much of the buffer holds meaningful data; the native
/// operation may use any prefix of the full capacity.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
}

// Safety: AlignedBuffer owns its allocation exclusively
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate a zeroed buffer, rounding capacity up to PAGE_SIZE
    pub fn new(capacity: usize) -> EngineResult<Self> {
        let capacity = Self::round_up(capacity);
        if capacity == 0 {
            return Err(EngineError::Allocation(
                "transfer buffer must not be empty".into(),
            ));
        }

        let layout = Layout::from_size_align(capacity, PAGE_SIZE).map_err(|_| {
            EngineError::Alignment {
                expected: PAGE_SIZE,
                actual: 0,
            }
        })?;

        // Safety: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            EngineError::Allocation(format!("{capacity} byte transfer buffer"))
        })?;

        Ok(Self {
            ptr,
            len: 0,
            capacity,
        })
    }

    /// Allocate a buffer of `size` bytes with every byte set to `byte`
    pub fn filled(size: usize, byte: u8) -> EngineResult<Self> {
        let mut buf = Self::new(size)?;
        buf.as_mut_slice().fill(byte);
        buf.len = size;
        Ok(buf)
    }

    /// Round up a size to the nearest PAGE_SIZE multiple
    #[inline]
    pub fn round_up(size: usize) -> usize {
        (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the buffer's length
    ///
    /// # Panics
    /// Panics if len > capacity
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity, "len exceeds capacity");
        self.len = len;
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Full capacity as a slice, regardless of len
    #[inline]
    pub fn as_full_slice(&self) -> &[u8] {
        // Safety: ptr is valid for capacity bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    /// Full capacity as a mutable slice, regardless of len
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: ptr is valid for capacity bytes
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Copy data into the start of the buffer
    pub fn copy_from_slice(&mut self, data: &[u8]) -> EngineResult<()> {
        if data.len() > self.capacity {
            return Err(EngineError::BufferSize {
                size: data.len(),
                capacity: self.capacity,
            });
        }

        self.as_mut_slice()[..data.len()].copy_from_slice(data);
        self.len = data.len();
        Ok(())
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.capacity, PAGE_SIZE) {
            // Safety: ptr was allocated with this layout
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.as_full_slice()[..self.len]
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.as_mut_slice()[..len]
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let buf = AlignedBuffer::new(100).unwrap();
        assert!((buf.as_ptr() as usize).is_multiple_of(PAGE_SIZE));
        assert_eq!(buf.capacity(), PAGE_SIZE);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(AlignedBuffer::round_up(0), 0);
        assert_eq!(AlignedBuffer::round_up(1), PAGE_SIZE);
        assert_eq!(AlignedBuffer::round_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(AlignedBuffer::round_up(PAGE_SIZE + 1), PAGE_SIZE * 2);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            AlignedBuffer::new(0),
            Err(EngineError::Allocation(_))
        ));
    }

    #[test]
    fn test_filled() {
        let buf = AlignedBuffer::filled(PAGE_SIZE, 0xab).unwrap();
        assert_eq!(buf.len(), PAGE_SIZE);
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_copy_from_slice() {
        let mut buf = AlignedBuffer::new(PAGE_SIZE).unwrap();
        buf.copy_from_slice(b"hello").unwrap();
        assert_eq!(&buf[..], b"hello");

        let too_big = vec![0u8; PAGE_SIZE + 1];
        assert!(matches!(
            buf.copy_from_slice(&too_big),
            Err(EngineError::BufferSize { .. })
        ));
    }
}
