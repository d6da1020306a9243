use std::{
    io::{self, Read, Seek, SeekFrom, Write},
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use tracing::warn;

use crate::ShmError;

/// One kernel attach. Detached when the last view over it drops.
#[derive(Debug)]
struct Mapping {
    base: NonNull<u8>,
    len: usize,
    read_only: bool,
}

unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.base.as_ptr().cast()) } != 0 {
            warn!(err = %io::Error::last_os_error(), "shmdt failed");
        }
    }
}

/// Cursor over an attached segment.
///
/// Byte I/O goes through `std::io::{Read, Write, Seek}` and advances the
/// cursor; the atomic accessors do the same in 4- or 8-byte steps. Clones
/// share the attach but carry their own cursor, so two threads can drive
/// disjoint offsets without coordinating seeks.
#[derive(Clone, Debug)]
pub struct SharedMemView {
    map: Arc<Mapping>,
    pos: usize,
}

impl SharedMemView {
    pub(crate) fn new(base: NonNull<u8>, len: usize, read_only: bool) -> Self {
        Self { map: Arc::new(Mapping { base, len, read_only }), pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len
    }

    pub fn is_empty(&self) -> bool {
        self.map.len == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn atomic_slot<T>(&self) -> Result<*const T, ShmError> {
        let size = size_of::<T>();
        let end = self.pos + size;
        if end > self.map.len {
            return Err(ShmError::OutOfBounds { pos: self.pos, end, len: self.map.len });
        }
        if self.pos % size != 0 {
            return Err(ShmError::Misaligned { pos: self.pos, size });
        }
        Ok(unsafe { self.map.base.as_ptr().add(self.pos) }.cast::<T>())
    }

    /// Acquire-loads the big-endian u32 at the cursor and advances past it.
    pub fn atomic_read_u32(&mut self) -> Result<u32, ShmError> {
        let slot = self.atomic_slot::<AtomicU32>()?;
        let raw = unsafe { &*slot }.load(Ordering::Acquire);
        self.pos += size_of::<u32>();
        Ok(u32::from_be(raw))
    }

    /// Release-stores `val` big-endian at the cursor and advances past it.
    ///
    /// This store is the publish edge of the pipe protocol: bytes written
    /// through the view before it are visible to any peer that
    /// acquire-loads the new value.
    pub fn atomic_write_u32(&mut self, val: u32) -> Result<(), ShmError> {
        if self.map.read_only {
            return Err(ShmError::ReadOnlyMapping);
        }
        let slot = self.atomic_slot::<AtomicU32>()?;
        unsafe { &*slot }.store(val.to_be(), Ordering::Release);
        self.pos += size_of::<u32>();
        Ok(())
    }

    pub fn atomic_read_u64(&mut self) -> Result<u64, ShmError> {
        let slot = self.atomic_slot::<AtomicU64>()?;
        let raw = unsafe { &*slot }.load(Ordering::Acquire);
        self.pos += size_of::<u64>();
        Ok(u64::from_be(raw))
    }

    pub fn atomic_write_u64(&mut self, val: u64) -> Result<(), ShmError> {
        if self.map.read_only {
            return Err(ShmError::ReadOnlyMapping);
        }
        let slot = self.atomic_slot::<AtomicU64>()?;
        unsafe { &*slot }.store(val.to_be(), Ordering::Release);
        self.pos += size_of::<u64>();
        Ok(())
    }
}

impl Read for SharedMemView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.map.len.saturating_sub(self.pos));
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.base.as_ptr().add(self.pos),
                buf.as_mut_ptr(),
                n,
            );
        }
        self.pos += n;
        Ok(n)
    }
}

impl Write for SharedMemView {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.map.read_only {
            return Err(ShmError::ReadOnlyMapping.into());
        }
        let n = buf.len().min(self.map.len.saturating_sub(self.pos));
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.map.base.as_ptr().add(self.pos), n);
        }
        self.pos += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedMemView {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.map.len as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before segment start"));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}
