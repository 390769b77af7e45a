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

//! Global tracing subscriber setup.
//!
//! Layers: a non-blocking stdout layer and, when a log directory is
//! configured, hourly-rotated main and error-only file appenders. The level
//! filter sits behind a reload handle so the daemon can retune verbosity
//! when its config file is rewritten through the mount, without restarting.

use std::{env, io::IsTerminal, path::PathBuf, sync::Once};

use once_cell::sync::OnceCell;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, filter, layer::SubscriberExt, prelude::*};

/// Handle for swapping the level filter at runtime.
///
/// Populated by [`init_global_logging`]; [`set_debug`] uses it to apply the
/// `log/debug` knob on config reload.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

/// Fallback filter when neither the config nor `RUST_LOG` specifies one.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Configuration for the logging stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Prefix for rolled log file names (the config's `log/ident`).
    pub ident: String,

    /// Directory for rolling log files. `None` keeps logging on stdout
    /// only.
    pub dir: Option<PathBuf>,

    /// Filter string such as `"info"` or `"debug,fuser=warn"`. `None`
    /// falls back to `RUST_LOG`, then to `"info"`.
    pub level: Option<String>,

    /// Rotated files retained per appender.
    pub max_log_files: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            ident:         "sfs-fuse".to_string(),
            dir:           None,
            level:         None,
            max_log_files: 720,
        }
    }
}

/// Filter string for a given `log/debug` config value.
#[must_use]
pub fn targets_for_debug(debug: u32) -> &'static str {
    if debug > 0 { "debug" } else { DEFAULT_LOG_TARGETS }
}

/// Swap the active level filter; used by the config hot-reload path.
///
/// A no-op before [`init_global_logging`] has run.
pub fn set_debug(debug: u32) {
    if let Some(handle) = RELOAD_HANDLE.get() {
        let targets = targets_for_debug(debug)
            .parse::<filter::Targets>()
            .expect("static filter string must parse");
        if let Err(e) = handle.reload(targets) {
            tracing::warn!(error = %e, "failed to reload log filter");
        }
    }
}

fn rolling_appender(dir: &PathBuf, prefix: &str, max_log_files: usize) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_log_files)
        .build(dir)
        .unwrap_or_else(|e| {
            panic!("initializing rolling file appender at {} failed: {e}", dir.display())
        })
}

/// Initialize the global tracing subscriber.
///
/// Returns the `WorkerGuard`s of the non-blocking writers; they must stay
/// alive for the lifetime of the process or buffered log lines are lost.
/// Guarded by a `Once`: only the first call has any effect.
#[must_use]
pub fn init_global_logging(opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(stdout_guard);
        let stdout_logging_layer = tracing_subscriber::fmt::Layer::new()
            .with_writer(stdout_writer)
            .with_ansi(std::io::stdout().is_terminal())
            .boxed();

        let file_logging_layer = opts.dir.as_ref().map(|dir| {
            let appender = rolling_appender(dir, &opts.ident, opts.max_log_files);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        });

        let err_file_logging_layer = opts.dir.as_ref().map(|dir| {
            let prefix = format!("{}-err", opts.ident);
            let appender = rolling_appender(dir, &prefix, opts.max_log_files);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed()
        });

        let targets = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(targets);
        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging got called twice?");

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_for_debug() {
        assert_eq!(targets_for_debug(0), "info");
        assert_eq!(targets_for_debug(1), "debug");
        assert_eq!(targets_for_debug(7), "debug");
    }

    #[test]
    fn test_default_options() {
        let opts = LoggingOptions::default();
        assert_eq!(opts.ident, "sfs-fuse");
        assert!(opts.dir.is_none());
        assert_eq!(opts.max_log_files, 720);
    }
}
