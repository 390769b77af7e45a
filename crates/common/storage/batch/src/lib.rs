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

//! Durable append-only change-batch pipeline.
//!
//! Every successful mutation observed by the filesystem layer becomes a
//! path-level event. Events are deduplicated within the open batch, appended
//! to a staging file, and the batch is published by an atomic rename into the
//! outbox directory once it trips an event-count, byte, or age threshold.
//!
//! Components:
//! - [`Clock`]: never-regressing wall-clock source for batch names
//! - [`DedupSet`]: per-batch suppression of redundant events
//! - [`BatchWriter`]: owns the staging file, appends, rotates, publishes
//! - [`FlushTimer`]: background thread forcing rotation on batch age
//! - [`recovery`]: startup promotion of staging residue into the outbox

mod clock;
mod dedup;
mod dirsync;
mod name;
mod timer;
mod writer;

pub mod error;
pub mod recovery;

pub use clock::{Clock, Timespec};
pub use dedup::DedupSet;
pub use error::{Error, Result};
pub use name::{BATCH_SUFFIX, BatchName, Mode, is_batch_file};
pub use timer::FlushTimer;
pub use writer::{BatchWriter, NodeIdentity};
