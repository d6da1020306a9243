use std::io::{self, Read};

/// Staging area for inbound frames. Bytes are loaned out to the caller
/// and stay valid until the next fill.
#[derive(Debug, Default)]
pub(crate) struct ReadBuffer {
    data: Vec<u8>,
}

impl ReadBuffer {
    /// Logical clear. A no-op: every fill overwrites the window it loans.
    pub(crate) fn reset(&mut self) {}

    /// Ensures capacity for `n` bytes, growing by exactly the shortfall.
    pub(crate) fn grow(&mut self, n: usize) {
        if n > self.data.len() {
            self.data.resize(n, 0);
        }
    }

    /// Reads exactly `n` bytes from `src` into the front of the buffer.
    pub(crate) fn fill_from<R: Read>(&mut self, src: &mut R, n: usize) -> io::Result<()> {
        self.grow(n);
        src.read_exact(&mut self.data[..n])
    }

    /// The first `n` bytes, valid until the next fill.
    pub(crate) fn window(&self, n: usize) -> &[u8] {
        &self.data[..n]
    }
}

/// Staging area for outbound frames.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    data: Vec<u8>,
}

impl WriteBuffer {
    /// Truncates to empty, retaining capacity.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
    }

    /// Extends by `n` zero bytes and returns the reserved tail window.
    pub(crate) fn append_zero(&mut self, n: usize) -> &mut [u8] {
        let offset = self.data.len();
        self.data.resize(offset + n, 0);
        &mut self.data[offset..]
    }

    pub(crate) fn append(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
