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

//! Per-batch event deduplication.
//!
//! The set mirrors exactly the paths already written into the currently open
//! batch and is cleared together with every rotation. It is an optimization
//! against trivially redundant events, not a cross-batch correctness
//! mechanism: after a rotation the same path legitimately re-enters the next
//! batch.

use std::{collections::HashSet, sync::Mutex};

/// Thread-safe set of event paths seen in the open batch.
#[derive(Debug, Default)]
pub struct DedupSet {
    paths: Mutex<HashSet<String>>,
}

impl DedupSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record `path`; returns `true` if it was not present before.
    pub fn add(&self, path: &str) -> bool {
        self.paths
            .lock()
            .expect("dedup lock poisoned")
            .insert(path.to_owned())
    }

    pub fn clear(&self) { self.paths.lock().expect("dedup lock poisoned").clear(); }

    #[must_use]
    pub fn len(&self) -> usize { self.paths.lock().expect("dedup lock poisoned").len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reports_first_insertion() {
        let set = DedupSet::new();
        assert!(set.add("/a"));
        assert!(!set.add("/a"));
        assert!(set.add("/b"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let set = DedupSet::new();
        set.add("/a");
        set.add("/b");
        set.clear();
        assert!(set.is_empty());
        assert!(set.add("/a"));
    }

    #[test]
    fn test_concurrent_adds_insert_once() {
        use std::sync::Arc;

        let set = Arc::new(DedupSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || (0..100).filter(|i| set.add(&format!("/{i}"))).count())
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 100);
        assert_eq!(set.len(), 100);
    }
}
