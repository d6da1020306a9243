use std::sync::{Arc, atomic::AtomicU32};
use std::time::Duration;

use mempipe_shm::{AttachFlags, SharedMem, SharedMemView};

use crate::{
    error::PipeError,
    frame,
    session::{ReadSession, WriteSession},
};

/// One endpoint of the pipe protocol bound to a segment view.
///
/// A connection is driven from one direction at a time: its reads and
/// writes take `&mut self`, and the payload returned by [`Conn::read`]
/// borrows the internal buffer until the next read.
pub struct Conn {
    pub(crate) view: SharedMemView,
    pub(crate) mem: SharedMem,
    pub(crate) read: ReadSession,
    pub(crate) write: WriteSession,
    pub(crate) attached: Arc<AtomicU32>,
    pub(crate) read_only: bool,
}

impl Conn {
    /// Bidirectional connection over an existing attach.
    pub fn new(mem: SharedMem, view: SharedMemView) -> Result<Self, PipeError> {
        Self::build(mem, view, false)
    }

    /// Consumer-role connection. Attaches the segment itself. The mapping
    /// stays read-write (the reader stores the read counter) and the role
    /// is enforced by rejecting [`Conn::write`].
    pub fn read_only(mem: SharedMem) -> Result<Self, PipeError> {
        let view = mem.attach(&AttachFlags::default())?;
        Self::build(mem, view, true)
    }

    /// Producer-role connection. Attaches the segment itself.
    pub fn write_only(mem: SharedMem) -> Result<Self, PipeError> {
        let view = mem.attach(&AttachFlags::default())?;
        Self::build(mem, view, false)
    }

    fn build(mem: SharedMem, view: SharedMemView, read_only: bool) -> Result<Self, PipeError> {
        let attached = Arc::new(AtomicU32::new(peer_attaches(&mem)?));
        Ok(Self {
            view,
            mem,
            read: ReadSession::default(),
            write: WriteSession::new(Arc::clone(&attached)),
            attached,
            read_only,
        })
    }

    /// Blocks until a frame arrives and returns `(code, payload,
    /// wire_size)`. The payload slice is valid until the next read on
    /// this connection.
    pub fn read(&mut self) -> Result<(u32, &[u8], usize), PipeError> {
        self.read.read(&mut self.view)
    }

    /// Publishes a frame once the previous one is acknowledged by every
    /// attached peer. Returns the wire size (`payload + 4`).
    pub fn write(&mut self, code: u32, payload: &[u8]) -> Result<u32, PipeError> {
        if payload.len() > frame::MAX_PAYLOAD {
            return Err(PipeError::MessageTooLarge);
        }
        if self.read_only {
            return Err(PipeError::ReadOnly);
        }
        self.write.write(&mut self.view, code, payload)
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Duration>) {
        self.read.set_deadline(deadline);
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Duration>) {
        self.write.set_deadline(deadline);
    }

    /// Re-stats the segment and updates the cached peer attach count the
    /// writer's acknowledgement check uses. Call after peers come or go;
    /// the hot loops never refresh on their own.
    pub fn refresh_attached(&self) -> Result<u32, PipeError> {
        let peers = peer_attaches(&self.mem)?;
        self.attached.store(peers, std::sync::atomic::Ordering::Relaxed);
        Ok(peers)
    }

    /// Releases this side's attach once the last view clone drops. The
    /// segment itself is not destroyed.
    pub fn close(self) {}
}

fn peer_attaches(mem: &SharedMem) -> Result<u32, PipeError> {
    // Don't count our own attach.
    Ok((mem.stat()?.current_attaches as u32).saturating_sub(1))
}
