// Copyright 2025 the sfs authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mtime side effects for metadata-only mutations.
//!
//! Replicators that watch mtime would miss pure chmod/chown changes, so the
//! `update_mtime` policy bumps the target's mtime alongside them: `touch`
//! sets it to now, `increment` to the current mtime plus one nanosecond.
//! `forbid_older_mtime` additionally rejects utimens calls that would move
//! mtime backwards.

use std::{ffi::CString, io, os::unix::ffi::OsStrExt, path::Path, time::SystemTime};

use sfs_config::UpdateMtime;
use tracing::error;

/// Timespec that leaves the corresponding timestamp untouched.
pub(crate) const OMIT: libc::timespec = libc::timespec {
    tv_sec:  0,
    tv_nsec: libc::UTIME_OMIT,
};

/// Timespec resolving to the current time at syscall level.
pub(crate) const NOW: libc::timespec = libc::timespec {
    tv_sec:  0,
    tv_nsec: libc::UTIME_NOW,
};

/// Set a path's `[atime, mtime]` pair via utimensat.
pub(crate) fn set_times(path: &Path, times: [libc::timespec; 2], flags: libc::c_int) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: c_path is a valid NUL-terminated string and times points at
    // two initialized timespec values, as utimensat requires.
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Timespec for an absolute instant.
pub(crate) fn timespec_of(time: SystemTime) -> libc::timespec {
    let (sec, nsec) = split_system_time(time);
    libc::timespec {
        tv_sec:  sec,
        tv_nsec: i64::from(nsec),
    }
}

/// Set a path's mtime, leaving atime untouched.
fn set_mtime(path: &Path, mtime: libc::timespec) -> io::Result<()> {
    set_times(path, [OMIT, mtime], 0)
}

/// Apply the configured mtime policy after a successful chmod/chown.
///
/// A failure is logged and swallowed: the policy is a precondition of the
/// event, not a postcondition, and the change event is emitted regardless.
pub fn apply_update_mtime(policy: UpdateMtime, domain: &str, path: &Path) {
    let result = match policy {
        UpdateMtime::No => return,
        UpdateMtime::Touch => set_mtime(path, NOW),
        UpdateMtime::Increment => current_mtime(path).and_then(|(sec, nsec)| {
            set_mtime(path, libc::timespec {
                tv_sec:  sec,
                tv_nsec: i64::from(nsec) + 1,
            })
        }),
    };

    if let Err(e) = result {
        error!(domain, path = ?path, error = %e, "could not update mtime");
    }
}

/// The path's current mtime as `(seconds, nanoseconds)`.
fn current_mtime(path: &Path) -> io::Result<(i64, u32)> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(split_system_time(modified))
}

/// Whether setting `requested` as the new mtime would move the path's mtime
/// strictly backwards.
pub fn mtime_would_regress(path: &Path, requested: SystemTime) -> io::Result<bool> {
    let current = std::fs::metadata(path)?.modified()?;
    Ok(requested < current)
}

fn split_system_time(time: SystemTime) -> (i64, u32) {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos()),
        // Pre-epoch mtimes round toward the epoch; they only ever appear on
        // hand-crafted filesystems.
        Err(e) => {
            let d = e.duration();
            (-i64::try_from(d.as_secs()).unwrap_or(i64::MAX), 0)
        }
    }
}
