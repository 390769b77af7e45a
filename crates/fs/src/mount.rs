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

//! Mount option assembly.
//!
//! The fsname is set to the backing root and the subtype to `sfs`, so the
//! mount shows up as `<rootdir> type fuse.sfs` in the mount table.
//! Remaining `-o` options from the command line are forwarded to the
//! kernel.

use std::path::Path;

use fuser::MountOption;

/// Build the mount option list: identity options plus the passthrough of
/// user-supplied `-o` options.
#[must_use]
pub fn mount_options(rootdir: &Path, extra: &[String]) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(rootdir.display().to_string()),
        MountOption::Subtype("sfs".to_string()),
    ];
    options.extend(extra.iter().map(|opt| parse_option(opt)));
    options
}

fn parse_option(opt: &str) -> MountOption {
    match opt {
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        other => MountOption::CUSTOM(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_options_lead() {
        let options = mount_options(Path::new("/srv/data"), &[]);
        assert_eq!(options[0], MountOption::FSName("/srv/data".to_string()));
        assert_eq!(options[1], MountOption::Subtype("sfs".to_string()));
    }

    #[test]
    fn test_known_options_are_typed() {
        let extra = vec!["allow_other".to_string(), "noatime".to_string()];
        let options = mount_options(Path::new("/srv"), &extra);
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::NoAtime));
    }

    #[test]
    fn test_unknown_options_pass_through() {
        let extra = vec!["big_writes".to_string()];
        let options = mount_options(Path::new("/srv"), &extra);
        assert!(options.contains(&MountOption::CUSTOM("big_writes".to_string())));
    }
}
