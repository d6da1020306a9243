use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use chrono::Utc;
use mempipe_shm::{SharedMem, SharedMemView, ShmFlags};
use tracing::{debug, warn};

use crate::{
    conn::Conn,
    error::PipeError,
    frame,
    message::{Msg, MsgReader, MsgWriter},
    session::{ReadSession, WriteSession},
};

struct ReadEnd {
    view: SharedMemView,
    session: ReadSession,
}

struct WriteEnd {
    view: SharedMemView,
    session: WriteSession,
    read_only: bool,
}

/// Serialising façade over a [`Conn`].
///
/// The read and write paths are guarded by independent mutexes, so one
/// thread can block in [`MsgReader::read_msg`] while another sends. A
/// blocked call holds its path's mutex for the whole wait, so set
/// deadlines before issuing calls that might never complete.
pub struct Pipe {
    reader: Mutex<ReadEnd>,
    writer: Mutex<Option<WriteEnd>>,
    mem: SharedMem,
    attached: Arc<AtomicU32>,
    closed: AtomicBool,
}

impl Pipe {
    /// Producer end. Creates the segment for `id`; fails if it already
    /// exists. New messages are only sent once the previous one has been
    /// acknowledged by the receiver.
    pub fn create_writer(id: i64, size: u64) -> Result<Self, PipeError> {
        let mem =
            SharedMem::get(id, size, &ShmFlags { create: true, exclusive: true, perms: 0o600 })?;
        let conn = Conn::write_only(mem)?;
        debug!(id, size, "created write pipe");
        Ok(Self::from_conn(conn))
    }

    /// Consumer end. Opens an existing segment and immediately marks it
    /// for destruction, so the kernel reclaims it when the last attach
    /// drops.
    pub fn open_reader(id: i64, size: u64) -> Result<Self, PipeError> {
        let mem =
            SharedMem::get(id, size, &ShmFlags { create: false, exclusive: false, perms: 0o600 })?;
        let conn = Conn::read_only(mem)?;
        mem.remove()?;
        debug!(id, "opened read pipe");
        Ok(Self::from_conn(conn))
    }

    /// Wraps an already-built connection.
    pub fn from_conn(conn: Conn) -> Self {
        let Conn { view, mem, read, write, attached, read_only } = conn;
        Self {
            reader: Mutex::new(ReadEnd { view: view.clone(), session: read }),
            writer: Mutex::new(Some(WriteEnd { view, session: write, read_only })),
            mem,
            attached,
            closed: AtomicBool::new(false),
        }
    }

    /// Parks until a peer attaches, polling the segment stat once per
    /// second. Returns immediately if a peer was already attached when
    /// the attach count was last cached. Refreshes the cache the writer's
    /// acknowledgement check reads.
    pub fn wait_conn(&self) -> Result<(), PipeError> {
        let cached = self.attached.load(Ordering::Relaxed);
        if cached != 0 {
            return Ok(());
        }

        loop {
            let refreshed = (self.mem.stat()?.current_attaches as u32).saturating_sub(1);
            if refreshed != cached {
                self.attached.store(refreshed, Ordering::Relaxed);
                debug!(peers = refreshed, "peer attached");
                return Ok(());
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    /// Disables the endpoint. Subsequent reads and writes return
    /// [`PipeError::Closed`]; the kernel attach is released once the last
    /// outstanding view drops. The segment itself is not destroyed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        *self.writer.lock().unwrap() = None;
    }
}

impl MsgReader for Pipe {
    fn read_msg(&self) -> Result<Msg, PipeError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(PipeError::Closed);
        }

        let mut end = self.reader.lock().unwrap();
        let end = &mut *end;
        let (code, payload, _) = end.session.read(&mut end.view)?;

        let mut msg = Msg::new(code as u64, payload.to_vec());
        msg.set_timestamp(Utc::now());
        Ok(msg)
    }

    fn set_read_deadline(&self, deadline: Option<Duration>) {
        self.reader.lock().unwrap().session.set_deadline(deadline);
    }
}

impl MsgWriter for Pipe {
    fn write_msg(&self, msg: &Msg) -> Result<(), PipeError> {
        if msg.payload.len() > frame::MAX_PAYLOAD {
            return Err(PipeError::MessageTooLarge);
        }
        let mut guard = self.writer.lock().unwrap();
        let end = guard.as_mut().ok_or(PipeError::Closed)?;
        if end.read_only {
            return Err(PipeError::ReadOnly);
        }
        end.session.write(&mut end.view, msg.code as u32, &msg.payload)?;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Duration>) {
        if let Some(end) = self.writer.lock().unwrap().as_mut() {
            end.session.set_deadline(deadline);
        }
    }
}

/// Recovery hook: removes the segment for `id` if it exists, without
/// creating it. For supervisors reclaiming a segment orphaned by a
/// crashed producer.
pub fn clear_pipe(id: i64) {
    let Ok(mem) = SharedMem::get(id, 0, &ShmFlags { create: false, exclusive: false, perms: 0o600 })
    else {
        return;
    };
    if let Err(err) = mem.remove() {
        warn!(id, %err, "couldn't remove orphaned segment");
    }
}
