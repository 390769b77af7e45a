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

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use sfs_app::MountArgs;

#[derive(Debug, Parser)]
#[clap(
    name = "sfs",
    about = "Stackable pass-through filesystem that captures changes into durable batch files",
    version,
    long_about = r"
Mounts <ROOTDIR> at <MOUNTPOINT> and records every mutation applied through
the mount as a change batch under the configured batch directory.
Examples:

sfs /srv/data /mnt/data -o allow_other
sfs /srv/data /mnt/data -o sfs_uid=105,sfs_gid=105
"
)]
struct Cli {
    /// Backing directory that holds the real files.
    rootdir: PathBuf,

    /// Where to mount the pass-through filesystem.
    mountpoint: PathBuf,

    /// Mount options: sfs_uid=N, sfs_gid=N, sfs_perms, plus standard FUSE
    /// options (allow_other, ro, ...).
    #[arg(short = 'o', value_delimiter = ',', action = clap::ArgAction::Append)]
    options: Vec<String>,

    /// Equivalent to '-o sfs_perms': per-request permission checks
    /// (requires running as root).
    #[arg(long)]
    perms: bool,
}

/// Pull the sfs-specific options out of the `-o` list; everything else is
/// forwarded to the kernel.
fn split_options(cli: Cli) -> Result<MountArgs, String> {
    let mut uid = None;
    let mut gid = None;
    let mut perm_checks = cli.perms;
    let mut mount_options = Vec::new();

    for opt in cli.options {
        if let Some(value) = opt.strip_prefix("sfs_uid=") {
            uid = Some(
                value
                    .parse()
                    .map_err(|_| format!("invalid sfs_uid value '{value}'"))?,
            );
        } else if let Some(value) = opt.strip_prefix("sfs_gid=") {
            gid = Some(
                value
                    .parse()
                    .map_err(|_| format!("invalid sfs_gid value '{value}'"))?,
            );
        } else if opt == "sfs_perms" {
            perm_checks = true;
        } else {
            mount_options.push(opt);
        }
    }

    Ok(MountArgs {
        rootdir: cli.rootdir,
        mountpoint: cli.mountpoint,
        uid,
        gid,
        perm_checks,
        mount_options,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let args = match split_options(cli) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("sfs: {message}");
            return ExitCode::from(3);
        }
    };

    match sfs_app::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sfs: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli { Cli::parse_from(args) }

    #[test]
    fn test_positional_arguments() {
        let args = split_options(cli(&["sfs", "/srv/data", "/mnt/data"])).unwrap();
        assert_eq!(args.rootdir, PathBuf::from("/srv/data"));
        assert_eq!(args.mountpoint, PathBuf::from("/mnt/data"));
        assert!(!args.perm_checks);
        assert!(args.mount_options.is_empty());
    }

    #[test]
    fn test_sfs_options_are_extracted() {
        let args = split_options(cli(&[
            "sfs",
            "/srv",
            "/mnt",
            "-o",
            "sfs_uid=105,sfs_gid=106,allow_other",
        ]))
        .unwrap();
        assert_eq!(args.uid, Some(105));
        assert_eq!(args.gid, Some(106));
        assert_eq!(args.mount_options, vec!["allow_other".to_string()]);
    }

    #[test]
    fn test_sfs_perms_option_matches_the_flag() {
        let via_option = split_options(cli(&["sfs", "/srv", "/mnt", "-o", "sfs_perms"])).unwrap();
        let via_flag = split_options(cli(&["sfs", "/srv", "/mnt", "--perms"])).unwrap();
        assert!(via_option.perm_checks);
        assert!(via_flag.perm_checks);
    }

    #[test]
    fn test_repeated_o_flags_accumulate() {
        let args = split_options(cli(&[
            "sfs", "/srv", "/mnt", "-o", "allow_other", "-o", "noatime",
        ]))
        .unwrap();
        assert_eq!(args.mount_options, vec![
            "allow_other".to_string(),
            "noatime".to_string()
        ]);
    }

    #[test]
    fn test_invalid_uid_is_rejected() {
        let err = split_options(cli(&["sfs", "/srv", "/mnt", "-o", "sfs_uid=abc"])).unwrap_err();
        assert!(err.contains("sfs_uid"));
    }
}
