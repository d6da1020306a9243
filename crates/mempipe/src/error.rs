use std::io;

use mempipe_shm::ShmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("message too large")]
    MessageTooLarge,
    #[error("connection is read only")]
    ReadOnly,
    #[error("write timedout")]
    WriteTimedout,
    #[error("read timedout")]
    ReadTimedout,
    #[error("pipe closed")]
    Closed,
    #[error(transparent)]
    Segment(#[from] ShmError),
    #[error("segment i/o")]
    Io(#[from] io::Error),
}
