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

use std::{fs::File, path::Path};

use tracing::error;

/// Fsync a directory so renames and creations inside it become durable.
///
/// Failure is logged at error severity and reported to the caller; losing
/// the directory sync can lose a published batch on power failure.
pub(crate) fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let result = File::open(dir).and_then(|f| f.sync_all());
    if let Err(ref e) = result {
        error!(dir = ?dir, error = %e, "cannot fsync directory, this may lead to batch loss");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsync_existing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(fsync_dir(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_fsync_missing_directory_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gone = temp_dir.path().join("missing");
        assert!(fsync_dir(&gone).is_err());
    }
}
