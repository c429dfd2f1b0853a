//! Open-file budget for worker connections (Unix `RLIMIT_NOFILE`).

/// Descriptors one worker connection holds: store handle, WAL, shm, checkpoint append.
pub const FDS_PER_WORKER: usize = 4;

/// Kept back for the main connection, log output and settings/secret files.
const RESERVED_FDS: u64 = 32;

/// Soft limit on open descriptors; `None` when unlimited or unknown.
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return None;
    }
    let soft = rlim.rlim_cur as u64;
    (rlim.rlim_cur != libc::RLIM_INFINITY && soft <= i64::MAX as u64).then_some(soft)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Workers for a descriptor limit after the reserve. Never below one.
pub fn workers_for_fd_limit(limit: u64) -> usize {
    let usable = limit.saturating_sub(RESERVED_FDS) as usize;
    (usable / FDS_PER_WORKER).max(1)
}

/// Cap on concurrent worker connections from the process limit, or `None` when unlimited.
pub fn max_workers_by_fd_limit() -> Option<usize> {
    max_open_fds().map(workers_for_fd_limit)
}
