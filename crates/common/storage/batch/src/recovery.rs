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

//! Startup promotion of staging residue.
//!
//! A previous process may have exited after creating a staging batch but
//! before publishing it. Batch names are globally unique per host, so
//! promoting residue under the identical filename cannot collide with a
//! name a future run will pick. Runs exactly once, before any filesystem
//! callback can be served.

use std::{fs, path::Path};

use snafu::ResultExt;
use tracing::info;

use crate::{
    Result,
    dirsync::fsync_dir,
    error::{PromoteBatchSnafu, ReadStagingSnafu},
    name::is_batch_file,
};

/// Promote every `*.batch` file left in the staging directory into the
/// outbox, then fsync both directories. Returns the number of promoted
/// batches.
///
/// # Errors
///
/// Any failed rename aborts recovery; the operator must resolve the
/// conflict before the service can be trusted.
pub fn recover(staging_dir: &Path, outbox_dir: &Path) -> Result<usize> {
    let mut promoted = 0;

    let entries = fs::read_dir(staging_dir).context(ReadStagingSnafu { path: staging_dir })?;
    for entry in entries {
        let entry = entry.context(ReadStagingSnafu { path: staging_dir })?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !is_batch_file(name) {
            continue;
        }

        let from = entry.path();
        let to = outbox_dir.join(name);
        fs::rename(&from, &to).context(PromoteBatchSnafu {
            from: from.clone(),
            to:   to.clone(),
        })?;
        promoted += 1;
    }

    let _ = fsync_dir(outbox_dir);
    let _ = fsync_dir(staging_dir);

    info!(
        promoted,
        staging = ?staging_dir,
        outbox = ?outbox_dir,
        "promoted pending batches from the staging directory"
    );
    Ok(promoted)
}
