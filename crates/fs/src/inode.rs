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

//! Inode number to mount-relative path mapping.
//!
//! The kernel addresses entries by inode number while the backing
//! filesystem and the event stream work with paths, so the table keeps a
//! bimap between the two. Paths are mount-relative with a leading `/`; the
//! root is inode 1. Entries live for as long as the kernel holds lookups on
//! them and are dropped once the lookup count returns to zero.

use std::collections::HashMap;

/// Inode number of the mount root, fixed by the FUSE protocol.
pub const ROOT_INODE: u64 = 1;

struct Entry {
    path:    String,
    nlookup: u64,
}

/// Bimap of inode numbers and mount-relative paths.
pub struct InodeTable {
    by_ino:  HashMap<u64, Entry>,
    by_path: HashMap<String, u64>,
    next:    u64,
}

impl Default for InodeTable {
    fn default() -> Self { Self::new() }
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            by_ino:  HashMap::new(),
            by_path: HashMap::new(),
            next:    ROOT_INODE + 1,
        };
        table.by_ino.insert(ROOT_INODE, Entry {
            path:    "/".to_string(),
            nlookup: 1,
        });
        table.by_path.insert("/".to_string(), ROOT_INODE);
        table
    }

    /// Mount-relative path for a child of `parent`.
    #[must_use]
    pub fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Inode for a path, assigning a fresh number on first sight, and bump
    /// its lookup count. Call once per entry replied to the kernel.
    pub fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.nlookup += 1;
            }
            return ino;
        }

        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, Entry {
            path:    path.to_string(),
            nlookup: 1,
        });
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Path currently bound to an inode.
    #[must_use]
    pub fn path_of(&self, ino: u64) -> Option<&str> {
        self.by_ino.get(&ino).map(|entry| entry.path.as_str())
    }

    /// Drop `nlookup` kernel references; the entry is removed when the
    /// count reaches zero. The root is never forgotten.
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let Some(entry) = self.by_ino.get_mut(&ino) else {
            return;
        };
        entry.nlookup = entry.nlookup.saturating_sub(nlookup);
        if entry.nlookup == 0 {
            let entry = self.by_ino.remove(&ino).expect("entry just looked up");
            self.by_path.remove(&entry.path);
        }
    }

    /// Rewrite the binding of `old` (and, for directories, every descendant
    /// path under it) after a successful rename.
    pub fn rename(&mut self, old: &str, new: &str) {
        let old_prefix = format!("{old}/");
        let affected: Vec<u64> = self
            .by_path
            .iter()
            .filter(|(path, _)| *path == old || path.starts_with(&old_prefix))
            .map(|(_, &ino)| ino)
            .collect();

        for ino in affected {
            let Some(entry) = self.by_ino.get_mut(&ino) else {
                continue;
            };
            self.by_path.remove(&entry.path);
            let rewritten = if entry.path == old {
                new.to_string()
            } else {
                format!("{new}{}", &entry.path[old.len()..])
            };
            entry.path = rewritten.clone();
            self.by_path.insert(rewritten, ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INODE), Some("/"));
    }

    #[test]
    fn test_assign_is_stable_per_path() {
        let mut table = InodeTable::new();
        let a = table.assign("/a");
        let b = table.assign("/b");
        assert_ne!(a, b);
        assert_eq!(table.assign("/a"), a);
        assert_eq!(table.path_of(a), Some("/a"));
    }

    #[test]
    fn test_child_path_joins_against_root() {
        assert_eq!(InodeTable::child_path("/", "a"), "/a");
        assert_eq!(InodeTable::child_path("/dir", "a"), "/dir/a");
    }

    #[test]
    fn test_forget_drops_entry_at_zero_lookups() {
        let mut table = InodeTable::new();
        let ino = table.assign("/a");
        table.assign("/a");

        table.forget(ino, 1);
        assert_eq!(table.path_of(ino), Some("/a"));

        table.forget(ino, 1);
        assert_eq!(table.path_of(ino), None);
        // A fresh assignment gets a fresh inode.
        assert_ne!(table.assign("/a"), ino);
    }

    #[test]
    fn test_forget_never_drops_the_root() {
        let mut table = InodeTable::new();
        table.forget(ROOT_INODE, u64::MAX);
        assert_eq!(table.path_of(ROOT_INODE), Some("/"));
    }

    #[test]
    fn test_rename_rewrites_the_entry() {
        let mut table = InodeTable::new();
        let ino = table.assign("/a");
        table.rename("/a", "/b");
        assert_eq!(table.path_of(ino), Some("/b"));
        assert_eq!(table.assign("/b"), ino);
    }

    #[test]
    fn test_rename_rewrites_descendants() {
        let mut table = InodeTable::new();
        let dir = table.assign("/dir");
        let inner = table.assign("/dir/sub/file");
        let unrelated = table.assign("/dirother");

        table.rename("/dir", "/moved");

        assert_eq!(table.path_of(dir), Some("/moved"));
        assert_eq!(table.path_of(inner), Some("/moved/sub/file"));
        assert_eq!(table.path_of(unrelated), Some("/dirother"));
    }
}
