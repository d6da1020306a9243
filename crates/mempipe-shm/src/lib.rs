//! SysV shared-memory segments and cursor views over them.
//!
//! A [`SharedMem`] is a handle to a kernel segment addressed by an integer
//! key. Attaching yields a [`SharedMemView`]: positioned byte I/O through
//! `std::io::{Read, Write, Seek}` plus atomic big-endian u32/u64 accessors
//! at the cursor. The atomics are the only cross-process synchronisation
//! primitive the segment offers; stores are release, loads are acquire.

mod error;
mod segment;
mod view;

pub use error::ShmError;
pub use segment::{AttachFlags, IpcPerms, SharedMem, ShmFlags, ShmStat};
pub use view::SharedMemView;
