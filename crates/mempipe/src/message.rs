use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipeError;

/// Decodes a message payload into some richer form.
pub trait Decoder {
    type Error;

    fn decode(&mut self, payload: &[u8]) -> Result<(), Self::Error>;
}

/// One delivered message: code, owned payload and the receive timestamp
/// in microseconds since the epoch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Msg {
    pub code: u64,
    /// Size of the raw payload.
    pub size: u32,
    pub payload: Vec<u8>,
    pub received_at: i64,
}

impl Msg {
    pub fn new(code: u64, payload: Vec<u8>) -> Self {
        let size = payload.len() as u32;
        Self { code, size, payload, received_at: 0 }
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.received_at).unwrap_or_default()
    }

    pub(crate) fn set_timestamp(&mut self, t: DateTime<Utc>) {
        self.received_at = t.timestamp_micros();
    }

    pub fn decode<D: Decoder>(&self, decoder: &mut D) -> Result<(), D::Error> {
        decoder.decode(&self.payload)
    }

    /// Drops the message without looking at the payload.
    pub fn discard(self) {}
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg #{} ({} bytes)", self.code, self.size)
    }
}

/// Consumer role. A deadline of `None` waits forever.
pub trait MsgReader {
    fn read_msg(&self) -> Result<Msg, PipeError>;

    /// If no message arrives within this window, `read_msg` returns
    /// [`PipeError::ReadTimedout`].
    fn set_read_deadline(&self, deadline: Option<Duration>);
}

/// Producer role. A deadline of `None` waits forever.
pub trait MsgWriter {
    fn write_msg(&self, msg: &Msg) -> Result<(), PipeError>;

    /// If the previous message is not acknowledged within this window,
    /// `write_msg` returns [`PipeError::WriteTimedout`].
    fn set_write_deadline(&self, deadline: Option<Duration>);
}

pub trait MsgReadWriter: MsgReader + MsgWriter {}

impl<T: MsgReader + MsgWriter> MsgReadWriter for T {}
