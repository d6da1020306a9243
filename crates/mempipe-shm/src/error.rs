use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShmError {
    #[error("{call} failed")]
    Os {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("atomic access at {pos} not {size}-byte aligned")]
    Misaligned { pos: usize, size: usize },
    #[error("access at {pos}..{end} outside segment of {len} bytes")]
    OutOfBounds { pos: usize, end: usize, len: usize },
    #[error("segment attached read only")]
    ReadOnlyMapping,
}

impl ShmError {
    pub(crate) fn os(call: &'static str) -> Self {
        Self::Os { call, source: io::Error::last_os_error() }
    }
}

impl From<ShmError> for io::Error {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::Os { source, .. } => source,
            ShmError::ReadOnlyMapping => io::Error::new(io::ErrorKind::PermissionDenied, e),
            _ => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}
