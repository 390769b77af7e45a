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

//! The batch writer: owns the open staging file, appends events, rotates on
//! thresholds, and publishes completed batches into the outbox.
//!
//! ## Concurrency
//!
//! All mutations of writer state (open file, counters, batch name, dedup
//! set) serialize on one mutex, the *batch lock*. Critical sections include
//! blocking I/O (`write`, `rename`, directory fsync): under load the
//! pipeline degrades to single-threaded append, which is the right
//! trade-off since the staging file is the bottleneck anyway. The rolling
//! byte counter is the exception: [`BatchWriter::note_bytes_written`] is a
//! lock-free fetch-add fed by the filesystem data path, and only the
//! threshold check in `submit_event` reads it under the lock.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use sfs_config::{ConfigHandle, Settings};
use snafu::ResultExt;
use tracing::{debug, error, info};

use crate::{
    Result,
    clock::Clock,
    dedup::DedupSet,
    dirsync::fsync_dir,
    error::{AppendEventSnafu, CreateBatchSnafu, HostnameSnafu},
    name::{BatchName, Mode},
};

const RENAME_ATTEMPTS: u32 = 3;
const RENAME_BACKOFF: Duration = Duration::from_millis(1);

/// Per-process identity embedded in every batch name.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub hostname: String,
    pub pid:      u32,
}

impl NodeIdentity {
    /// Resolve the local hostname and pid.
    pub fn detect() -> Result<Self> {
        let hostname = hostname::get()
            .context(HostnameSnafu)?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            hostname,
            pid: std::process::id(),
        })
    }
}

/// The currently open batch. Exists between the first submitted event and
/// the rotation that publishes it.
struct OpenBatch {
    file:         File,
    staging_path: PathBuf,
    name:         BatchName,
    opened_at:    Instant,
    events:       u64,
}

/// State guarded by the batch lock. `last_sec` and `subid` survive across
/// batches so names created within the same second stay unique.
struct WriterState {
    open:     Option<OpenBatch>,
    last_sec: i64,
    subid:    u32,
}

/// Appends change events to the current batch and publishes completed
/// batches by an atomic rename from the staging directory to the outbox.
pub struct BatchWriter {
    state:    Mutex<WriterState>,
    dedup:    DedupSet,
    bytes:    AtomicU64,
    clock:    Clock,
    identity: NodeIdentity,
    config:   Arc<ConfigHandle>,
}

impl BatchWriter {
    #[must_use]
    pub fn new(config: Arc<ConfigHandle>, identity: NodeIdentity) -> Self {
        Self {
            state: Mutex::new(WriterState {
                open:     None,
                last_sec: -1,
                subid:    0,
            }),
            dedup: DedupSet::new(),
            bytes: AtomicU64::new(0),
            clock: Clock::new(),
            identity,
            config,
        }
    }

    /// Append a path event of the given mode to the current batch.
    ///
    /// An open batch of a different mode is rotated first so every published
    /// batch stays mode-homogeneous. A path already recorded in the open
    /// batch is suppressed without a write. Crossing the event-count or byte
    /// threshold rotates the batch after the append.
    ///
    /// # Errors
    ///
    /// Creating the staging file can fail (including the rare
    /// `AlreadyExists` collision on sub-id reuse); the error is surfaced and
    /// writer state stays clean, so the next submit retries with a fresh
    /// timestamp. A failed append abandons the damaged batch (see
    /// `discard_locked`) and surfaces the error; the batch's events are
    /// lost and nothing reaches the outbox.
    pub fn submit_event(&self, path: &str, mode: Mode) -> Result<()> {
        let settings = self.config.current();
        let mut state = self.state.lock().expect("batch lock poisoned");

        debug!(path, mode = %mode, "batching event");

        if state.open.as_ref().is_some_and(|b| b.name.mode != mode) {
            self.rotate_locked(&mut state, &settings);
        }
        if state.open.is_none() {
            self.open_batch_locked(&mut state, &settings, mode)?;
        }

        if !self.dedup.add(path) {
            return Ok(());
        }

        let line = format!("{path}\n");
        let write_result = {
            let batch = state.open.as_mut().expect("batch is open");
            batch
                .file
                .write_all(line.as_bytes())
                .map_err(|e| (batch.staging_path.clone(), e))
        };
        if let Err((staging_path, e)) = write_result {
            error!(
                batch = ?staging_path,
                event = path,
                error = %e,
                "error while writing batch event, discarding the damaged batch"
            );
            self.discard_locked(&mut state);
            return Err(e).context(AppendEventSnafu { path: staging_path });
        }

        let events = {
            let batch = state.open.as_mut().expect("batch is open");
            batch.events += 1;
            batch.events
        };
        let bytes = self.bytes.fetch_add(line.len() as u64, Ordering::Relaxed) + line.len() as u64;

        if events >= settings.batch_max_events || bytes >= settings.batch_max_bytes {
            self.rotate_locked(&mut state, &settings);
        }

        Ok(())
    }

    /// Account filesystem data bytes against the byte threshold.
    ///
    /// Fed by the data-write path so a long stream of writes to one
    /// (already deduplicated) path still flushes its event within a bounded
    /// amount of user data. Lock-free; the threshold fires on the next
    /// submitted event or timer tick.
    pub fn note_bytes_written(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Rotate the open batch when it has outlived `age_budget`.
    ///
    /// Called by the flush timer; a no-op when no batch is open or the
    /// batch is younger than the budget.
    pub fn force_rotate_if_stale(&self, age_budget: Duration) {
        let settings = self.config.current();
        let mut state = self.state.lock().expect("batch lock poisoned");
        if state
            .open
            .as_ref()
            .is_some_and(|b| b.opened_at.elapsed() >= age_budget)
        {
            self.rotate_locked(&mut state, &settings);
        }
    }

    /// Create the staging file for a new batch and make its existence
    /// durable.
    fn open_batch_locked(
        &self,
        state: &mut WriterState,
        settings: &Settings,
        mode: Mode,
    ) -> Result<()> {
        let now = self.clock.now();
        let subid = if now.sec == state.last_sec {
            state.subid + 1
        } else {
            0
        };

        let name = BatchName {
            sec: now.sec,
            node: settings.node_name.clone(),
            host: self.identity.hostname.clone(),
            pid: self.identity.pid,
            subid,
            mode,
        };
        let staging_path = settings.batch_tmp_dir.join(name.file_name());

        let mut options = OpenOptions::new();
        options.write(true).create_new(true).mode(0o666);
        let mut flags = libc::O_NONBLOCK | libc::O_NOATIME;
        if settings.use_osync {
            flags |= libc::O_SYNC;
        }
        options.custom_flags(flags);

        let file = options.open(&staging_path).with_context(|_| CreateBatchSnafu {
            path: staging_path.clone(),
        })?;

        debug!(path = ?staging_path, "created staging batch");
        let _ = fsync_dir(&settings.batch_tmp_dir);

        state.last_sec = now.sec;
        state.subid = subid;
        state.open = Some(OpenBatch {
            file,
            staging_path,
            name,
            opened_at: Instant::now(),
            events: 0,
        });
        Ok(())
    }

    /// Abandon the open batch after fatal staging-file I/O.
    ///
    /// The staging file may hold a torn final record, so it is closed and
    /// removed without ever touching the outbox; the batch's events are
    /// lost to the stream. All in-memory state is reset so the pipeline
    /// accepts the next event from a clean slate.
    fn discard_locked(&self, state: &mut WriterState) {
        if let Some(batch) = state.open.take() {
            let OpenBatch {
                file, staging_path, ..
            } = batch;
            drop(file);
            if let Err(e) = fs::remove_file(&staging_path) {
                error!(
                    path = ?staging_path,
                    error = %e,
                    "cannot remove discarded staging batch"
                );
            }
        }

        self.bytes.store(0, Ordering::Relaxed);
        self.dedup.clear();
    }

    /// Close and publish the open batch, then reset all in-memory state.
    ///
    /// The rename is retried a bounded number of times with a short
    /// back-off. When it permanently fails the batch is discarded: state is
    /// still cleared so the pipeline accepts the next event from a clean
    /// slate, and the loss is reported at error severity.
    fn rotate_locked(&self, state: &mut WriterState, settings: &Settings) {
        if let Some(batch) = state.open.take() {
            let OpenBatch {
                file,
                staging_path,
                name,
                ..
            } = batch;
            debug!(path = ?staging_path, "publishing batch");
            drop(file);

            let outbox_path = settings.batch_dir.join(name.file_name());
            let mut published = false;
            for attempt in 1..=RENAME_ATTEMPTS {
                match fs::rename(&staging_path, &outbox_path) {
                    Ok(()) => {
                        if attempt > 1 {
                            info!(attempt, to = ?outbox_path, "batch rename succeeded after retries");
                        }
                        published = true;
                        break;
                    }
                    Err(e) => {
                        error!(
                            attempt,
                            from = ?staging_path,
                            to = ?outbox_path,
                            error = %e,
                            "rename of staging batch failed"
                        );
                        if attempt < RENAME_ATTEMPTS {
                            std::thread::sleep(RENAME_BACKOFF);
                        }
                    }
                }
            }

            if published {
                let _ = fsync_dir(&settings.batch_dir);
                let _ = fsync_dir(&settings.batch_tmp_dir);
            } else {
                error!(
                    from = ?staging_path,
                    "giving up on publishing batch, its events are lost to the stream"
                );
            }
        }

        self.bytes.store(0, Ordering::Relaxed);
        self.dedup.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use tempfile::TempDir;

    use super::*;

    struct WriterFixture {
        _temp:   TempDir,
        staging: PathBuf,
        outbox:  PathBuf,
        writer:  BatchWriter,
    }

    impl WriterFixture {
        fn new(max_events: u64, max_bytes: u64) -> Self {
            let temp = TempDir::new().unwrap();
            let outbox = temp.path().join("batches");
            let staging = temp.path().join("staging");
            fs::create_dir_all(&outbox).unwrap();
            fs::create_dir_all(&staging).unwrap();

            let config_path = temp.path().join(sfs_config::CONFIG_FILE_NAME);
            let mut file = File::create(&config_path).unwrap();
            write!(
                file,
                "[sfs]\n\
                 batch_dir={}\n\
                 batch_tmp_dir={}\n\
                 pid_path={}\n\
                 node_name=node1\n\
                 batch_flush_msec=60000\n\
                 batch_max_events={max_events}\n\
                 batch_max_bytes={max_bytes}\n\
                 use_osync=0\n\
                 forbid_older_mtime=0\n\
                 update_mtime=no\n",
                outbox.display(),
                staging.display(),
                temp.path().join("sfs.pid").display(),
            )
            .unwrap();

            let config = Arc::new(ConfigHandle::load(&config_path).unwrap());
            let identity = NodeIdentity {
                hostname: "testhost".to_string(),
                pid:      4242,
            };
            Self {
                _temp: temp,
                staging,
                outbox,
                writer: BatchWriter::new(config, identity),
            }
        }

        fn list(dir: &PathBuf) -> Vec<PathBuf> {
            let mut entries: Vec<_> = fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect();
            entries.sort();
            entries
        }

        fn staging_files(&self) -> Vec<PathBuf> { Self::list(&self.staging) }

        fn published(&self) -> Vec<PathBuf> { Self::list(&self.outbox) }
    }

    #[test]
    fn test_duplicate_path_is_written_once() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();

        let staging = fixture.staging_files();
        assert_eq!(staging.len(), 1);
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/a\n");
    }

    #[test]
    fn test_event_threshold_rotates() {
        let fixture = WriterFixture::new(2, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.submit_event("/b", Mode::NoRec).unwrap();
        fixture.writer.submit_event("/c", Mode::NoRec).unwrap();

        let published = fixture.published();
        assert_eq!(published.len(), 1);
        assert_eq!(fs::read_to_string(&published[0]).unwrap(), "/a\n/b\n");

        let staging = fixture.staging_files();
        assert_eq!(staging.len(), 1);
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/c\n");
    }

    #[test]
    fn test_mode_change_rotates_before_the_new_event() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.submit_event("/dir", Mode::Rec).unwrap();

        let published = fixture.published();
        assert_eq!(published.len(), 1);
        let norec = published[0].file_name().unwrap().to_str().unwrap();
        assert!(norec.ends_with("_norec.batch"), "{norec}");
        assert_eq!(fs::read_to_string(&published[0]).unwrap(), "/a\n");

        let staging = fixture.staging_files();
        assert_eq!(staging.len(), 1);
        let rec = staging[0].file_name().unwrap().to_str().unwrap();
        assert!(rec.ends_with("_rec.batch"), "{rec}");
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/dir\n");
    }

    #[test]
    fn test_same_mode_events_share_a_batch() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.submit_event("/b", Mode::NoRec).unwrap();

        let staging = fixture.staging_files();
        assert_eq!(staging.len(), 1);
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/a\n/b\n");
        assert!(fixture.published().is_empty());
    }

    #[test]
    fn test_rotation_resets_dedup_and_counters() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.force_rotate_if_stale(Duration::ZERO);

        {
            let state = fixture.writer.state.lock().unwrap();
            assert!(state.open.is_none());
        }
        assert!(fixture.writer.dedup.is_empty());
        assert_eq!(fixture.writer.bytes.load(Ordering::Relaxed), 0);

        // The same path legitimately re-enters the next batch.
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        assert_eq!(fixture.published().len(), 1);
        let staging = fixture.staging_files();
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/a\n");
    }

    #[test]
    fn test_batch_names_stay_unique_and_ordered() {
        let fixture = WriterFixture::new(100, 1 << 20);
        let mut names_in_creation_order = Vec::new();
        for path in ["/a", "/b", "/c"] {
            fixture.writer.submit_event(path, Mode::NoRec).unwrap();
            let staging = fixture.staging_files();
            names_in_creation_order
                .push(staging[0].file_name().unwrap().to_str().unwrap().to_string());
            fixture.writer.force_rotate_if_stale(Duration::ZERO);
        }

        assert_eq!(fixture.published().len(), 3);
        // Later batches sort lexicographically after earlier ones; the
        // per-second sub-id keeps same-second names unique.
        for pair in names_in_creation_order.windows(2) {
            assert!(pair[0] < pair[1], "{pair:?}");
        }
    }

    #[test]
    fn test_data_bytes_trip_the_byte_threshold() {
        let fixture = WriterFixture::new(100, 512);
        fixture.writer.note_bytes_written(600);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();

        let published = fixture.published();
        assert_eq!(published.len(), 1);
        assert_eq!(fs::read_to_string(&published[0]).unwrap(), "/a\n");
        assert_eq!(fixture.writer.bytes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_event_bytes_also_feed_the_byte_threshold() {
        let fixture = WriterFixture::new(100, 8);
        fixture.writer.submit_event("/abcdefgh", Mode::NoRec).unwrap();

        // The 10-byte event line alone crosses the 8-byte threshold.
        assert_eq!(fixture.published().len(), 1);
    }

    #[test]
    fn test_write_failure_discards_the_batch_without_publishing() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();

        // Swap the staging handle for one where every write fails with
        // ENOSPC.
        {
            let mut state = fixture.writer.state.lock().unwrap();
            let batch = state.open.as_mut().unwrap();
            batch.file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        }

        assert!(fixture.writer.submit_event("/b", Mode::NoRec).is_err());

        // The damaged batch is abandoned: nothing reaches the outbox and
        // the staging file is gone, so a later recovery cannot promote it.
        assert!(fixture.published().is_empty());
        assert!(fixture.staging_files().is_empty());
        assert!(fixture.writer.dedup.is_empty());
        assert_eq!(fixture.writer.bytes.load(Ordering::Relaxed), 0);
        {
            let state = fixture.writer.state.lock().unwrap();
            assert!(state.open.is_none());
        }

        // The pipeline returns to a clean state and accepts the next event.
        fixture.writer.submit_event("/c", Mode::NoRec).unwrap();
        let staging = fixture.staging_files();
        assert_eq!(staging.len(), 1);
        assert_eq!(fs::read_to_string(&staging[0]).unwrap(), "/c\n");
    }

    #[test]
    fn test_create_failure_is_surfaced_and_state_stays_clean() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fs::remove_dir_all(&fixture.staging).unwrap();

        assert!(fixture.writer.submit_event("/a", Mode::NoRec).is_err());
        {
            let state = fixture.writer.state.lock().unwrap();
            assert!(state.open.is_none());
        }

        fs::create_dir_all(&fixture.staging).unwrap();
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        assert_eq!(fixture.staging_files().len(), 1);
    }

    #[test]
    fn test_stale_check_ignores_young_batches() {
        let fixture = WriterFixture::new(100, 1 << 20);
        fixture.writer.submit_event("/a", Mode::NoRec).unwrap();
        fixture.writer.force_rotate_if_stale(Duration::from_secs(3600));

        assert!(fixture.published().is_empty());
        assert_eq!(fixture.staging_files().len(), 1);
    }
}
