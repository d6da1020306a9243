use std::{mem, ptr::NonNull};

use crate::{ShmError, view::SharedMemView};

/// Creation flags for [`SharedMem::get`], mapped onto `shmget(2)` bits.
#[derive(Clone, Copy, Debug)]
pub struct ShmFlags {
    pub create: bool,
    pub exclusive: bool,
    pub perms: u32,
}

/// Attach flags for [`SharedMem::attach`].
///
/// A read-only attach makes every write through the view fail; the kernel
/// side uses `SHM_RDONLY` so even raw access cannot mutate the segment.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttachFlags {
    pub read_only: bool,
}

/// Ownership and mode bits of a SysV IPC object.
#[derive(Clone, Copy, Debug)]
pub struct IpcPerms {
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub creator_uid: u32,
    pub creator_gid: u32,
    pub mode: u32,
}

/// Snapshot of `shmctl(IPC_STAT)`.
#[derive(Clone, Copy, Debug)]
pub struct ShmStat {
    pub segment_size: usize,
    pub current_attaches: u64,
    pub perms: IpcPerms,
    pub creator_pid: i32,
    pub last_user_pid: i32,
    pub last_attach_at: i64,
    pub last_detach_at: i64,
    pub last_change_at: i64,
}

/// Handle to a SysV shared-memory segment.
///
/// The handle itself holds no mapping; it is cheap to clone and remains
/// valid until the segment is removed and the last attach drops. Dropping
/// the handle never destroys the segment; removal is explicit.
#[derive(Clone, Copy, Debug)]
pub struct SharedMem {
    id: i32,
    key: i64,
}

impl SharedMem {
    /// Obtains (and with `create` set, creates) the segment for `key`.
    pub fn get(key: i64, size: u64, flags: &ShmFlags) -> Result<Self, ShmError> {
        let mut shmflg = flags.perms as libc::c_int;
        if flags.create {
            shmflg |= libc::IPC_CREAT;
        }
        if flags.exclusive {
            shmflg |= libc::IPC_EXCL;
        }

        let id = unsafe { libc::shmget(key as libc::key_t, size as usize, shmflg) };
        if id < 0 {
            return Err(ShmError::os("shmget"));
        }
        Ok(Self { id, key })
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Maps the segment into this process and returns a cursor view at
    /// offset zero.
    ///
    /// The view length is the segment size rounded up to the page size:
    /// the kernel maps whole pages, and frame bodies are allowed to run
    /// into the tail padding.
    pub fn attach(&self, flags: &AttachFlags) -> Result<SharedMemView, ShmError> {
        let shmflg = if flags.read_only { libc::SHM_RDONLY } else { 0 };
        let ptr = unsafe { libc::shmat(self.id, std::ptr::null(), shmflg) };
        if ptr as isize == -1 {
            return Err(ShmError::os("shmat"));
        }

        let stat = self.stat()?;
        let len = page_round(stat.segment_size);
        let base = NonNull::new(ptr.cast::<u8>()).expect("shmat returned a null mapping");
        Ok(SharedMemView::new(base, len, flags.read_only))
    }

    pub fn stat(&self) -> Result<ShmStat, ShmError> {
        let mut ds: libc::shmid_ds = unsafe { mem::zeroed() };
        if unsafe { libc::shmctl(self.id, libc::IPC_STAT, &mut ds) } != 0 {
            return Err(ShmError::os("shmctl(IPC_STAT)"));
        }

        Ok(ShmStat {
            segment_size: ds.shm_segsz as usize,
            current_attaches: ds.shm_nattch as u64,
            perms: IpcPerms {
                owner_uid: ds.shm_perm.uid as u32,
                owner_gid: ds.shm_perm.gid as u32,
                creator_uid: ds.shm_perm.cuid as u32,
                creator_gid: ds.shm_perm.cgid as u32,
                mode: ds.shm_perm.mode as u32,
            },
            creator_pid: ds.shm_cpid as i32,
            last_user_pid: ds.shm_lpid as i32,
            last_attach_at: ds.shm_atime as i64,
            last_detach_at: ds.shm_dtime as i64,
            last_change_at: ds.shm_ctime as i64,
        })
    }

    /// Marks the segment for destruction. The kernel reclaims it once the
    /// last attach drops, so a consumer can remove immediately after
    /// attaching and still read.
    pub fn remove(&self) -> Result<(), ShmError> {
        if unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } != 0 {
            return Err(ShmError::os("shmctl(IPC_RMID)"));
        }
        Ok(())
    }
}

fn page_round(size: usize) -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    size.div_ceil(page) * page
}
