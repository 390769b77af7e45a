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

//! End-to-end scenarios for the change-batch pipeline: submit through
//! publication, age-based flushing, and startup recovery.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use sfs_batch::{BatchWriter, FlushTimer, Mode, NodeIdentity, recovery};
use sfs_config::ConfigHandle;
use tempfile::TempDir;

struct Pipeline {
    _temp:   TempDir,
    staging: PathBuf,
    outbox:  PathBuf,
    config:  Arc<ConfigHandle>,
    writer:  Arc<BatchWriter>,
}

fn pipeline(max_events: u64, max_bytes: u64, flush_msec: u64) -> Pipeline {
    let temp = TempDir::new().unwrap();
    let outbox = temp.path().join("batches");
    let staging = temp.path().join("staging");
    fs::create_dir_all(&outbox).unwrap();
    fs::create_dir_all(&staging).unwrap();

    let config_path = temp.path().join(sfs_config::CONFIG_FILE_NAME);
    let mut file = fs::File::create(&config_path).unwrap();
    write!(
        file,
        "[sfs]\n\
         batch_dir={}\n\
         batch_tmp_dir={}\n\
         pid_path={}\n\
         node_name=itest\n\
         batch_flush_msec={flush_msec}\n\
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
        hostname: "itest-host".to_string(),
        pid:      std::process::id(),
    };
    let writer = Arc::new(BatchWriter::new(Arc::clone(&config), identity));

    Pipeline {
        _temp: temp,
        staging,
        outbox,
        config,
        writer,
    }
}

fn published(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    entries.sort();
    entries
}

#[test]
fn writes_to_one_path_publish_a_single_deduplicated_event() {
    let p = pipeline(3, 1 << 20, 100);
    let timer = FlushTimer::start(Arc::clone(&p.writer), Arc::clone(&p.config)).unwrap();

    // create + two data writes + chmod on the same file
    p.writer.submit_event("/a", Mode::NoRec).unwrap();
    p.writer.note_bytes_written(100);
    p.writer.note_bytes_written(100);
    p.writer.submit_event("/a", Mode::NoRec).unwrap();

    // The age budget, not a threshold, publishes the batch.
    let deadline = Instant::now() + Duration::from_secs(5);
    while published(&p.outbox).is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    timer.shutdown();

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 1);
    let name = batches[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("_norec.batch"), "{name}");
    assert_eq!(fs::read_to_string(&batches[0]).unwrap(), "/a\n");
}

#[test]
fn event_threshold_splits_the_stream_into_two_batches() {
    let p = pipeline(2, 1 << 20, 60_000);

    p.writer.submit_event("/a", Mode::NoRec).unwrap();
    p.writer.submit_event("/b", Mode::NoRec).unwrap();
    p.writer.submit_event("/c", Mode::NoRec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 2);
    assert_eq!(fs::read_to_string(&batches[0]).unwrap(), "/a\n/b\n");
    assert_eq!(fs::read_to_string(&batches[1]).unwrap(), "/c\n");
}

#[test]
fn directory_rename_publishes_both_endpoints_recursively() {
    let p = pipeline(100, 1 << 20, 60_000);

    p.writer.submit_event("/dir", Mode::Rec).unwrap();
    p.writer.submit_event("/dir2", Mode::Rec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 1);
    let name = batches[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("_rec.batch"), "{name}");
    assert_eq!(fs::read_to_string(&batches[0]).unwrap(), "/dir\n/dir2\n");
}

#[test]
fn same_mode_events_continue_one_batch() {
    let p = pipeline(100, 1 << 20, 60_000);

    p.writer.submit_event("/a", Mode::NoRec).unwrap();
    p.writer.submit_event("/b", Mode::NoRec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 1);
    assert_eq!(fs::read_to_string(&batches[0]).unwrap(), "/a\n/b\n");
}

#[test]
fn resubmitting_after_rotation_lands_in_a_later_batch() {
    let p = pipeline(100, 1 << 20, 60_000);

    p.writer.submit_event("/a", Mode::NoRec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);
    p.writer.submit_event("/a", Mode::NoRec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert_eq!(fs::read_to_string(batch).unwrap(), "/a\n");
    }
    let first = batches[0].file_name().unwrap().to_str().unwrap();
    let second = batches[1].file_name().unwrap().to_str().unwrap();
    assert!(first < second);
}

#[test]
fn startup_recovery_promotes_residue_before_new_events() {
    let p = pipeline(100, 1 << 20, 60_000);
    let residue = "1400000000_itest_itest-host_1_00000_norec.batch";
    fs::write(p.staging.join(residue), "/old\n").unwrap();

    let promoted = recovery::recover(&p.staging, &p.outbox).unwrap();
    assert_eq!(promoted, 1);
    assert!(p.outbox.join(residue).exists());

    p.writer.submit_event("/new", Mode::NoRec).unwrap();
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 2);
    // The promoted residue keeps its original (older) name and therefore
    // sorts before anything this process publishes.
    assert_eq!(batches[0].file_name().unwrap().to_str().unwrap(), residue);
}

#[test]
fn concurrent_submitters_lose_no_paths() {
    let p = pipeline(u64::MAX, u64::MAX, 60_000);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let writer = Arc::clone(&p.writer);
            std::thread::spawn(move || {
                for i in 0..100 {
                    writer.submit_event(&format!("/t{t}/f{i}"), Mode::NoRec).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let mut seen = std::collections::HashSet::new();
    for batch in published(&p.outbox) {
        for line in fs::read_to_string(&batch).unwrap().lines() {
            assert!(seen.insert(line.to_string()), "duplicate event {line}");
        }
    }
    assert_eq!(seen.len(), 800);
}

#[test]
fn duplicate_paths_from_many_threads_publish_once_per_batch() {
    let p = pipeline(u64::MAX, u64::MAX, 60_000);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let writer = Arc::clone(&p.writer);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    writer.submit_event("/hot", Mode::NoRec).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    p.writer.force_rotate_if_stale(Duration::ZERO);

    let batches = published(&p.outbox);
    assert_eq!(batches.len(), 1);
    assert_eq!(fs::read_to_string(&batches[0]).unwrap(), "/hot\n");
}
