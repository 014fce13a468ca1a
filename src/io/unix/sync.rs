// Sync unix

use crate::prelude::*;
use nix::errno::Errno;
use nix::fcntl::FcntlArg;
use std::fs::File;
use std::os::unix::prelude::AsRawFd;

#[derive(Debug, PartialEq, Eq)]
enum LockAcquisitionResult {
    Acquired,
    AlreadyLocked,
    Error(Errno),
}

fn advisory_lock_file(fd: i32, shared: bool) -> LockAcquisitionResult {
    let l_type = if shared { libc::F_RDLCK } else { libc::F_WRLCK };
    let flock = libc::flock {
        l_len: 0, // 0 means "whole file"
        l_start: 0,
        l_whence: libc::SEEK_SET as i16,
        l_type: l_type as i16,
        l_pid: -1, // pid of current file owner, if any (when fcntl is invoked with F_GETLK)
    };
    let res = nix::fcntl::fcntl(fd, FcntlArg::F_SETLK(&flock));
    if let Err(e) = res {
        warn!("acquiring lock failed, errno: {:?}", e);
        match e {
            Errno::EACCES | Errno::EAGAIN => LockAcquisitionResult::AlreadyLocked,
            e => LockAcquisitionResult::Error(e),
        }
    } else {
        LockAcquisitionResult::Acquired
    }
}

pub(crate) fn lock(file: &File, path: &Path, shared: bool) -> Result<()> {
    match advisory_lock_file(file.as_raw_fd(), shared) {
        LockAcquisitionResult::Acquired => Ok(()),
        LockAcquisitionResult::AlreadyLocked => {
            error!("File {:?} is locked", path);
            Err(Error::file_locked(format!("file {} is locked", path.display())).into())
        }
        LockAcquisitionResult::Error(e) => Err(std::io::Error::from(e).into()),
    }
}
