//! Per-endpoint protocol state and the two-counter rendezvous.
//!
//! The segment head is three atomic big-endian u32 slots: the write
//! counter at 0, the read counter at 4 and the size of the currently
//! published frame at 8, with the frame body from 12 on. The counter
//! stores are the publish edges; everything else is plain byte I/O
//! ordered by them.

use std::{
    io::{self, Seek, SeekFrom, Write},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use mempipe_shm::SharedMemView;

use crate::{
    buffer::{ReadBuffer, WriteBuffer},
    error::PipeError,
    frame, wait,
};

pub(crate) const WRITE_COUNTER_OFFSET: u64 = 0;
pub(crate) const READ_COUNTER_OFFSET: u64 = 4;
pub(crate) const FRAME_SIZE_OFFSET: u64 = 8;

/// How many polls between deadline checks. The reader checks more often;
/// the writer amortises the clock read over a longer stretch.
const WRITE_DEADLINE_POLLS: u32 = 10_000;
const READ_DEADLINE_POLLS: u32 = 1_000;

/// Next counter value. 0 means "no frames yet" and is reserved for the
/// initial state, and u32::MAX is skipped so both sides wrap the same
/// way; published values run 1..=MAX-1 and then wrap back to 1.
#[inline]
pub(crate) fn bump(counter: u32) -> u32 {
    let next = counter.wrapping_add(1);
    if next == u32::MAX || next == 0 { 1 } else { next }
}

/// `bump` applied `by` times; the value the writer expects the shared
/// read counter to reach once every attached reader has acknowledged.
#[inline]
fn advance(counter: u32, by: u32) -> u32 {
    let mut c = counter;
    for _ in 0..by {
        c = bump(c);
    }
    c
}

#[derive(Debug, Default)]
pub(crate) struct ReadSession {
    /// Last write-counter value observed in the segment.
    pub(crate) wc: u32,
    /// Frames consumed and acknowledged by this endpoint.
    pub(crate) rc: u32,
    deadline: Option<Duration>,
    buf: ReadBuffer,
}

impl ReadSession {
    pub(crate) fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.deadline = deadline;
    }

    /// Waits for a frame, consumes it and returns `(code, payload,
    /// wire_size)`. The payload borrows the read buffer and is
    /// invalidated by the next call.
    pub(crate) fn read<'a>(
        &'a mut self,
        view: &mut SharedMemView,
    ) -> Result<(u32, &'a [u8], usize), PipeError> {
        self.wait_read(view)?;
        let frame = self.read_frame(view)?;
        let (code, payload) = frame::split(frame).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "frame shorter than its code prefix")
        })?;
        Ok((code, payload, payload.len() + frame::CODE_SIZE))
    }

    fn wait_read(&mut self, view: &mut SharedMemView) -> Result<(), PipeError> {
        let start = Instant::now();
        let mut polls: u32 = 0;
        loop {
            if self.can_read(view) {
                return Ok(());
            }
            polls = polls.wrapping_add(1);
            if polls % READ_DEADLINE_POLLS == 0
                && let Some(deadline) = self.deadline
                && start.elapsed() > deadline
            {
                return Err(PipeError::ReadTimedout);
            }
            wait::wait();
        }
    }

    fn can_read(&mut self, view: &mut SharedMemView) -> bool {
        if view.seek(SeekFrom::Start(WRITE_COUNTER_OFFSET)).is_err() {
            return false;
        }
        let Ok(w) = view.atomic_read_u32() else {
            return false;
        };
        if w == self.wc {
            return false;
        }
        self.wc = w;
        true
    }

    fn read_frame(&mut self, view: &mut SharedMemView) -> Result<&[u8], PipeError> {
        self.buf.reset();
        view.seek(SeekFrom::Start(FRAME_SIZE_OFFSET))?;
        let size = view.atomic_read_u32()? as usize;
        if size > view.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "published frame size exceeds the segment",
            )
            .into());
        }

        // Cursor sits at the frame body now.
        self.buf.fill_from(view, size)?;

        self.rc = bump(self.rc);
        view.seek(SeekFrom::Start(READ_COUNTER_OFFSET))?;
        view.atomic_write_u32(self.rc)?;
        Ok(self.buf.window(size))
    }
}

#[derive(Debug)]
pub(crate) struct WriteSession {
    /// Frames published by this endpoint.
    pub(crate) wc: u32,
    /// Shared read counter as of the last acknowledgement this endpoint
    /// gathered. Lags one frame behind between writes.
    pub(crate) rc: u32,
    /// Cached peer attach count, excluding self. Refreshed by
    /// `Pipe::wait_conn` / `Conn::refresh_attached`, never mid-loop.
    attached: Arc<AtomicU32>,
    deadline: Option<Duration>,
    buf: WriteBuffer,
}

impl WriteSession {
    pub(crate) fn new(attached: Arc<AtomicU32>) -> Self {
        Self { wc: 0, rc: 0, attached, deadline: None, buf: WriteBuffer::default() }
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.deadline = deadline;
    }

    /// Waits until the previous frame is acknowledged, publishes a new
    /// one and returns its wire size. The caller has already rejected
    /// oversized payloads and read-only roles.
    pub(crate) fn write(
        &mut self,
        view: &mut SharedMemView,
        code: u32,
        payload: &[u8],
    ) -> Result<u32, PipeError> {
        self.wait_write(view)?;
        self.write_frame(view, code, payload)?;
        Ok((payload.len() + frame::CODE_SIZE) as u32)
    }

    fn wait_write(&mut self, view: &mut SharedMemView) -> Result<(), PipeError> {
        if self.wc == 0 && self.rc == 0 {
            // Nothing published yet from this side, nothing to wait on.
            return Ok(());
        }

        let start = Instant::now();
        let mut polls: u32 = 0;
        loop {
            if self.can_write(view) {
                return Ok(());
            }
            polls = polls.wrapping_add(1);
            if polls % WRITE_DEADLINE_POLLS == 0
                && let Some(deadline) = self.deadline
                && start.elapsed() > deadline
            {
                return Err(PipeError::WriteTimedout);
            }
            wait::wait();
        }
    }

    fn can_write(&mut self, view: &mut SharedMemView) -> bool {
        if view.seek(SeekFrom::Start(READ_COUNTER_OFFSET)).is_err() {
            return false;
        }
        let Ok(r) = view.atomic_read_u32() else {
            return false;
        };
        if r == self.rc {
            return false;
        }
        if r != advance(self.rc, self.attached.load(Ordering::Relaxed)) {
            // Some attached reader has not acknowledged yet.
            return false;
        }
        self.rc = r;
        true
    }

    fn write_frame(
        &mut self,
        view: &mut SharedMemView,
        code: u32,
        payload: &[u8],
    ) -> Result<(), PipeError> {
        self.buf.reset();
        view.seek(SeekFrom::Start(FRAME_SIZE_OFFSET))?;
        view.atomic_write_u32((payload.len() + frame::CODE_SIZE) as u32)?;

        frame::encode_code(self.buf.append_zero(frame::CODE_SIZE), code);
        self.buf.append(payload);
        // Cursor sits at the frame body; the counter store below is the
        // publish edge that makes these bytes visible.
        view.write_all(self.buf.as_slice())?;

        view.seek(SeekFrom::Start(WRITE_COUNTER_OFFSET))?;
        self.wc = bump(self.wc);
        view.atomic_write_u32(self.wc)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_skips_zero_and_max() {
        assert_eq!(bump(0), 1);
        assert_eq!(bump(1), 2);
        assert_eq!(bump(u32::MAX - 2), u32::MAX - 1);
        assert_eq!(bump(u32::MAX - 1), 1);
        assert_eq!(bump(u32::MAX), 1);
    }

    #[test]
    fn advance_applies_bump_per_peer() {
        assert_eq!(advance(0, 1), 1);
        assert_eq!(advance(5, 3), 8);
        assert_eq!(advance(u32::MAX - 2, 2), 1);
        assert_eq!(advance(u32::MAX - 2, 3), 2);
    }
}
