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

//! Startup failures and their stable exit codes.
//!
//! The codes are observable by supervisors and must not change meaning
//! between releases.

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum StartupError {
    #[snafu(display("Root {path:?} does not exist or is not a directory"))]
    RootNotADirectory {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Mountpoint {path:?} does not exist or is not a directory"))]
    MountpointNotADirectory {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("sfs_uid and sfs_gid must be set together"))]
    PartialPrivilegeSpec {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Unable to drop privileges to uid={uid}, gid={gid}"))]
    DropPrivileges {
        uid:    u32,
        gid:    u32,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid configuration"))]
    Config {
        source: sfs_config::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cannot run as root without --perms"))]
    RootWithoutPerms {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Running as non-root with --perms will not have the expected behavior"))]
    PermsWithoutRoot {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Cannot write pid file {path:?}"))]
    WritePidFile {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Recovery of pending staging batches failed"))]
    Recovery {
        source: sfs_batch::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cannot resolve the node identity"))]
    Identity {
        source: sfs_batch::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cannot start the flush timer"))]
    SpawnTimer {
        source: sfs_batch::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cannot install the shutdown signal handler"))]
    SignalHandler {
        source: ctrlc::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Mounting the filesystem failed"))]
    Mount {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl StartupError {
    /// Stable exit code for supervisors.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::RootNotADirectory { .. } => 1,
            Self::MountpointNotADirectory { .. } => 2,
            Self::PartialPrivilegeSpec { .. } => 3,
            Self::DropPrivileges { .. } => 4,
            Self::Config { .. } => 5,
            Self::RootWithoutPerms { .. } | Self::PermsWithoutRoot { .. } => 6,
            Self::WritePidFile { .. } => 7,
            Self::Recovery { source, .. } => match source {
                sfs_batch::Error::ReadStaging { .. } => 8,
                _ => 9,
            },
            Self::Identity { .. } | Self::SpawnTimer { .. } | Self::SignalHandler { .. } => 10,
            Self::Mount { .. } => 11,
        }
    }
}
