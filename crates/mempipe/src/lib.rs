//! Single-producer / single-consumer message pipe over a SysV
//! shared-memory segment.
//!
//! Delivery is framed, ordered and acknowledged: the segment head holds a
//! write counter and a read counter, and the writer only publishes the
//! next frame once every attached reader has bumped the read counter for
//! the previous one. Waiting is busy-polling with short pauses; there is
//! no kernel wait primitive between the peers, only the two counters.

mod buffer;
mod conn;
mod error;
mod frame;
mod message;
mod pipe;
mod session;
pub mod wait;

pub use conn::Conn;
pub use error::PipeError;
pub use frame::MAX_PAYLOAD;
pub use message::{Decoder, Msg, MsgReadWriter, MsgReader, MsgWriter};
pub use pipe::{Pipe, clear_pipe};
