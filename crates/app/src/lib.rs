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

//! Application lifecycle.
//!
//! The startup sequence is strictly ordered: argument checks, privilege
//! drop, config load, telemetry, pid file, recovery of staging residue,
//! batch pipeline, mount. Each failure kind maps to a stable non-zero exit
//! code so supervisors can tell them apart. After mounting, the process
//! waits for SIGINT/SIGTERM, unmounts, and stops the flush timer; an open
//! batch is left in staging and recovered on the next boot.

mod error;

use std::{fs, path::PathBuf, sync::Arc};

use sfs_batch::{BatchWriter, FlushTimer, NodeIdentity, recovery};
use sfs_config::{CONFIG_FILE_NAME, ConfigHandle};
use sfs_fuse::{SfsFilesystem, SfsState, mount_options};
use sfs_telemetry::logging::{self, LoggingOptions};
use snafu::ResultExt;
use tracing::info;

pub use crate::error::StartupError;
use crate::error::{
    ConfigSnafu, DropPrivilegesSnafu, IdentitySnafu, MountSnafu, MountpointNotADirectorySnafu,
    PartialPrivilegeSpecSnafu, PermsWithoutRootSnafu, RecoverySnafu, RootNotADirectorySnafu,
    RootWithoutPermsSnafu, SignalHandlerSnafu, SpawnTimerSnafu, WritePidFileSnafu,
};

/// Everything the CLI hands over to start the daemon.
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub rootdir:       PathBuf,
    pub mountpoint:    PathBuf,
    /// `sfs_uid=N`: drop privileges to this user before doing anything.
    pub uid:           Option<u32>,
    /// `sfs_gid=N`: drop privileges to this group before doing anything.
    pub gid:           Option<u32>,
    /// `--perms` / `sfs_perms`: per-request credential switching.
    pub perm_checks:   bool,
    /// Remaining `-o` options, forwarded to the kernel.
    pub mount_options: Vec<String>,
}

/// Run the daemon until it is unmounted or signalled.
pub fn run(args: MountArgs) -> Result<(), StartupError> {
    let rootdir = args
        .rootdir
        .canonicalize()
        .ok()
        .filter(|p| p.is_dir())
        .ok_or_else(|| {
            RootNotADirectorySnafu {
                path: args.rootdir.clone(),
            }
            .build()
        })?;
    snafu::ensure!(args.mountpoint.is_dir(), MountpointNotADirectorySnafu {
        path: args.mountpoint.clone()
    });

    drop_privileges(args.uid, args.gid)?;
    check_root_policy(args.perm_checks)?;

    let config =
        Arc::new(ConfigHandle::load(rootdir.join(CONFIG_FILE_NAME)).context(ConfigSnafu)?);
    let settings = config.current();

    let _log_guards = logging::init_global_logging(&LoggingOptions {
        ident: settings.log.ident.clone(),
        dir: settings.log.dir.clone(),
        level: Some(logging::targets_for_debug(settings.log.debug).to_string()),
        ..Default::default()
    });
    sfs_telemetry::panic_hook::set_panic_hook();
    config.set_on_reload(|new_settings| logging::set_debug(new_settings.log.debug));

    write_pid_file(&settings.pid_path)?;

    let promoted = recovery::recover(&settings.batch_tmp_dir, &settings.batch_dir)
        .context(RecoverySnafu)?;
    info!(promoted, "recovery complete");

    let identity = NodeIdentity::detect().context(IdentitySnafu)?;
    let writer = Arc::new(BatchWriter::new(Arc::clone(&config), identity));
    let timer =
        FlushTimer::start(Arc::clone(&writer), Arc::clone(&config)).context(SpawnTimerSnafu)?;

    let state = Arc::new(SfsState::new(Arc::clone(&config), writer));
    let filesystem = SfsFilesystem::new(rootdir.clone(), state, args.perm_checks);
    let options = mount_options(&rootdir, &args.mount_options);

    info!(
        root = ?rootdir,
        mountpoint = ?args.mountpoint,
        uid = unsafe { libc::getuid() },
        gid = unsafe { libc::getgid() },
        "starting sfs"
    );

    let session =
        fuser::spawn_mount2(filesystem, &args.mountpoint, &options).context(MountSnafu)?;

    wait_for_shutdown_signal()?;

    info!("unmounting");
    drop(session);
    timer.shutdown();
    info!("sfs stopped");
    Ok(())
}

/// Drop to the configured uid/gid before touching anything else. Both must
/// be given together.
fn drop_privileges(uid: Option<u32>, gid: Option<u32>) -> Result<(), StartupError> {
    let (uid, gid) = match (uid, gid) {
        (None, None) => return Ok(()),
        (Some(uid), Some(gid)) => (uid, gid),
        _ => return PartialPrivilegeSpecSnafu.fail(),
    };

    // Group first: after setuid the process may no longer have the
    // privilege to change groups.
    // SAFETY: plain id arguments, no pointers.
    if unsafe { libc::setgid(gid) } < 0 || unsafe { libc::setuid(uid) } < 0 {
        return Err(std::io::Error::last_os_error()).context(DropPrivilegesSnafu { uid, gid });
    }

    info!(uid, gid, "dropped privileges");
    Ok(())
}

/// Root may only run with `--perms` (it needs the credential switching to
/// be meaningful), and `--perms` is pointless without root.
fn check_root_policy(perm_checks: bool) -> Result<(), StartupError> {
    // SAFETY: argument-less id reads.
    let (uid, euid) = unsafe { (libc::getuid(), libc::geteuid()) };
    if !perm_checks && (uid == 0 || euid == 0) {
        return RootWithoutPermsSnafu.fail();
    }
    if perm_checks && uid != 0 {
        return PermsWithoutRootSnafu.fail();
    }
    Ok(())
}

fn write_pid_file(path: &std::path::Path) -> Result<(), StartupError> {
    fs::write(path, format!("{}\n", std::process::id())).with_context(|_| WritePidFileSnafu {
        path: path.to_path_buf(),
    })
}

fn wait_for_shutdown_signal() -> Result<(), StartupError> {
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context(SignalHandlerSnafu)?;
    let _ = rx.recv();
    Ok(())
}
