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

//! Background task forcing rotation on batch age.
//!
//! A dedicated thread sleeps for the configured age budget and asks the
//! writer to rotate any batch that has outlived it. The timer is oblivious
//! to events and counters; its correctness follows from the writer's batch
//! lock. The age budget is re-read from config each iteration so a hot
//! reload takes effect on the next tick.

use std::{sync::Arc, thread::JoinHandle};

use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use sfs_config::ConfigHandle;
use snafu::ResultExt;
use tracing::info;

use crate::{Result, error::SpawnTimerSnafu, writer::BatchWriter};

/// Handle to the flush-timer thread.
///
/// Dropping the handle signals the thread to stop; [`FlushTimer::shutdown`]
/// additionally joins it, which tests use for determinism. In production
/// the timer runs for the lifetime of the mount.
pub struct FlushTimer {
    shutdown_tx: Option<Sender<()>>,
    handle:      Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawn the timer thread.
    pub fn start(writer: Arc<BatchWriter>, config: Arc<ConfigHandle>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("batch-flush".to_string())
            .spawn(move || {
                info!("flush timer started");
                loop {
                    let budget = config.current().batch_flush;
                    match shutdown_rx.recv_timeout(budget) {
                        Err(RecvTimeoutError::Timeout) => writer.force_rotate_if_stale(budget),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("flush timer stopped");
            })
            .context(SpawnTimerSnafu)?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle:      Some(handle),
        })
    }

    /// Stop the timer thread and wait for it to exit.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
