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

//! Per-request credential switching.
//!
//! With permission checks enabled the daemon runs as root and impersonates
//! the requesting uid/gid (filesystem uid, gid, and supplementary groups)
//! for the duration of each permission-bearing backing syscall. The switch
//! is serialized by its own access lock, which is never held together with
//! the batch lock.

use std::sync::{Mutex, MutexGuard};

use tracing::error;

/// Guards fsuid/fsgid switching for the whole process.
pub struct AccessGuard {
    enabled: bool,
    lock:    Mutex<()>,
}

/// Live impersonation of one request's credentials; restores root
/// credentials on drop.
pub struct AccessScope<'a> {
    guard: Option<MutexGuard<'a, ()>>,
}

impl AccessGuard {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lock: Mutex::new(()),
        }
    }

    /// Switch filesystem credentials to the requesting uid/gid.
    ///
    /// Returns an errno (`EPERM`) when the switch cannot be performed; the
    /// caller surfaces it to the kernel without touching the backing
    /// filesystem. A no-op scope is returned when permission checks are
    /// disabled.
    pub fn begin(&self, uid: u32, gid: u32) -> Result<AccessScope<'_>, libc::c_int> {
        if !self.enabled {
            return Ok(AccessScope { guard: None });
        }

        let guard = self.lock.lock().expect("access lock poisoned");

        if let Err(errno) = init_supplementary_groups(uid, gid) {
            error!(uid, gid, errno, "cannot initialize supplementary groups");
            return Err(libc::EPERM);
        }

        // SAFETY: setfsgid/setfsuid take plain ids and affect only the
        // calling thread's filesystem credentials.
        unsafe {
            libc::setfsgid(gid);
            libc::setfsuid(uid);
        }

        Ok(AccessScope { guard: Some(guard) })
    }
}

impl Drop for AccessScope<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            // SAFETY: restores the daemon's own (root) filesystem
            // credentials; no pointers involved.
            unsafe {
                libc::setfsuid(0);
                libc::setfsgid(0);
            }
        }
    }
}

/// Load the supplementary groups of the user behind `uid`.
///
/// Unknown uids are not an error: the request is served with the primary
/// gid only, matching what the backing filesystem would do.
fn init_supplementary_groups(uid: u32, gid: u32) -> Result<(), libc::c_int> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = [0_i8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: pwd, buf, and result outlive the call and have the sizes
    // getpwuid_r expects.
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &raw mut pwd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &raw mut result,
        )
    };
    if rc != 0 {
        return Err(rc);
    }
    if result.is_null() {
        return Ok(());
    }

    // SAFETY: getpwuid_r reported success, so pw_name points into buf.
    let rc = unsafe { libc::initgroups(pwd.pw_name, gid) };
    if rc < 0 {
        return Err(unsafe { *libc::__errno_location() });
    }
    Ok(())
}
