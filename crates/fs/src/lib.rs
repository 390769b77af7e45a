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

//! Pass-through FUSE layer.
//!
//! Every callback mirrors the operation onto the backing root directory;
//! successful mutations are classified into path-level change events and
//! fed to the batch writer. The filesystem layer never interprets file
//! content and performs no network I/O.

mod classify;
mod creds;
mod fs;
mod inode;
mod mount;
mod mtime;

use std::sync::Arc;

use sfs_batch::{BatchWriter, Mode};
use sfs_config::ConfigHandle;
use tracing::{debug, error};

pub use classify::{CONFIG_TRIGGER_PATH, MOUNT_MARKER_PATH, Operation, PathAction, filter_path};
pub use fs::SfsFilesystem;
pub use mount::mount_options;

/// Shared state injected into every core operation: the config handle and
/// the batch pipeline.
pub struct SfsState {
    config: Arc<ConfigHandle>,
    writer: Arc<BatchWriter>,
}

impl SfsState {
    #[must_use]
    pub fn new(config: Arc<ConfigHandle>, writer: Arc<BatchWriter>) -> Self {
        Self { config, writer }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ConfigHandle> { &self.config }

    /// Classify a successful mutation and batch the resulting events.
    ///
    /// Each affected path is filtered individually: a write to the config
    /// file triggers a hot reload instead of an event, administrative and
    /// ignored paths are suppressed.
    pub fn record_mutation(&self, op: &Operation<'_>, path: &str) {
        let settings = self.config.current();
        let ignore_prefix = settings.ignore_path_prefix.as_deref();

        for (event_path, mode) in classify::events_for(op, path) {
            match filter_path(&event_path, ignore_prefix) {
                PathAction::Record => self.record_one(&event_path, mode),
                PathAction::ReloadConfig => {
                    // Outcome is logged by the handle; a failed reload
                    // keeps the previous settings.
                    let _ = self.config.reload();
                }
                PathAction::Skip => debug!(path = event_path, "suppressed event"),
            }
        }
    }

    /// Account data-write volume against the batch byte threshold.
    pub fn note_bytes(&self, n: u64) { self.writer.note_bytes_written(n); }

    fn record_one(&self, path: &str, mode: Mode) {
        if let Err(e) = self.writer.submit_event(path, mode) {
            error!(path, error = %e, "failed to batch change event");
        }
    }
}
