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

//! Classification of filesystem mutations into change events.
//!
//! Single-entry mutations emit one `norec` event for the affected path. A
//! rename emits an event for both endpoints; when the source is a directory
//! the events carry the `rec` mode so the consumer re-examines the moved
//! subtree. Read-only operations never reach this module.

use sfs_batch::Mode;

/// Writing this path through the mount triggers a config hot-reload.
pub const CONFIG_TRIGGER_PATH: &str = "/.sfs.conf";

/// Administrative marker maintained by operators; never replicated.
pub const MOUNT_MARKER_PATH: &str = "/.sfs.mounted";

/// Substring of the artefact FUSE leaves behind when an open file is
/// unlinked.
const FUSE_HIDDEN_MARKER: &str = ".fuse_hidden";

/// A successful mutation as seen by the passthrough layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<'a> {
    Mknod,
    Mkdir,
    Unlink,
    Rmdir,
    Symlink,
    /// Hard link; the path handed to the classifier is the new endpoint.
    Link,
    Chmod,
    Chown,
    Truncate,
    Utimens,
    SetXattr,
    RemoveXattr,
    /// Close of a file handle that was open for writing.
    WriteClose,
    Rename {
        new_path:      &'a str,
        source_is_dir: bool,
    },
}

/// The events a mutation emits, before per-path filtering.
#[must_use]
pub fn events_for(op: &Operation<'_>, path: &str) -> Vec<(String, Mode)> {
    match op {
        Operation::Rename {
            new_path,
            source_is_dir,
        } => {
            let mode = if *source_is_dir { Mode::Rec } else { Mode::NoRec };
            vec![(path.to_string(), mode), ((*new_path).to_string(), mode)]
        }
        _ => vec![(path.to_string(), Mode::NoRec)],
    }
}

/// Outcome of path filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAction {
    /// Batch the event.
    Record,
    /// Reload the config instead of emitting an event.
    ReloadConfig,
    /// Suppress the event.
    Skip,
}

/// Decide whether an event path is recorded, suppressed, or turned into a
/// config reload.
#[must_use]
pub fn filter_path(path: &str, ignore_prefix: Option<&str>) -> PathAction {
    if path == CONFIG_TRIGGER_PATH {
        PathAction::ReloadConfig
    } else if path == MOUNT_MARKER_PATH {
        PathAction::Skip
    } else if ignore_prefix.is_some_and(|prefix| path.starts_with(prefix)) {
        PathAction::Skip
    } else if path.contains(FUSE_HIDDEN_MARKER) {
        PathAction::Skip
    } else {
        PathAction::Record
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Operation::Mknod ; "mknod")]
    #[test_case(Operation::Mkdir ; "mkdir")]
    #[test_case(Operation::Unlink ; "unlink")]
    #[test_case(Operation::Rmdir ; "rmdir")]
    #[test_case(Operation::Symlink ; "symlink")]
    #[test_case(Operation::Link ; "link")]
    #[test_case(Operation::Chmod ; "chmod")]
    #[test_case(Operation::Chown ; "chown")]
    #[test_case(Operation::Truncate ; "truncate")]
    #[test_case(Operation::Utimens ; "utimens")]
    #[test_case(Operation::SetXattr ; "setxattr")]
    #[test_case(Operation::RemoveXattr ; "removexattr")]
    #[test_case(Operation::WriteClose ; "write close")]
    fn test_single_entry_mutations_emit_one_norec_event(op: Operation<'static>) {
        let events = events_for(&op, "/a");
        assert_eq!(events, vec![("/a".to_string(), Mode::NoRec)]);
    }

    #[test]
    fn test_directory_rename_emits_both_endpoints_recursively() {
        let op = Operation::Rename {
            new_path:      "/dir2",
            source_is_dir: true,
        };
        let events = events_for(&op, "/dir");
        assert_eq!(
            events,
            vec![
                ("/dir".to_string(), Mode::Rec),
                ("/dir2".to_string(), Mode::Rec)
            ]
        );
    }

    #[test]
    fn test_file_rename_emits_both_endpoints_non_recursively() {
        let op = Operation::Rename {
            new_path:      "/b",
            source_is_dir: false,
        };
        let events = events_for(&op, "/a");
        assert_eq!(
            events,
            vec![
                ("/a".to_string(), Mode::NoRec),
                ("/b".to_string(), Mode::NoRec)
            ]
        );
    }

    #[test_case("/.sfs.conf", PathAction::ReloadConfig ; "config file triggers reload")]
    #[test_case("/.sfs.mounted", PathAction::Skip ; "mount marker is skipped")]
    #[test_case("/data/report.csv", PathAction::Record ; "ordinary path is recorded")]
    #[test_case("/a/.fuse_hidden0001", PathAction::Skip ; "fuse hidden artefact")]
    #[test_case("/x/.fuse_hidden42/y", PathAction::Skip ; "fuse hidden anywhere in the path")]
    #[test_case("/.sfs.conf.bak", PathAction::Record ; "config-adjacent name is recorded")]
    fn test_filter_without_prefix(path: &str, expected: PathAction) {
        assert_eq!(filter_path(path, None), expected);
    }

    #[test_case("/scratch/tmp.1", PathAction::Skip ; "under the ignored prefix")]
    #[test_case("/scratchy", PathAction::Skip ; "prefix match is textual")]
    #[test_case("/data/scratch", PathAction::Record ; "prefix anchored at the start")]
    fn test_filter_with_prefix(path: &str, expected: PathAction) {
        assert_eq!(filter_path(path, Some("/scratch")), expected);
    }
}
