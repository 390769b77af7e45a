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

//! Parsing and validation of the `.sfs.conf` INI file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ini::Ini;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{
    InvalidValueSnafu, LoadConfigSnafu, MissingKeySnafu, NotADirectorySnafu, Result,
    UnknownKeySnafu,
};

/// Name of the config file, resolved relative to the mounted root directory.
pub const CONFIG_FILE_NAME: &str = ".sfs.conf";

/// Mtime side effect applied to the target of chmod/chown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMtime {
    /// Leave mtime alone.
    #[default]
    No,
    /// Set mtime to the current time.
    Touch,
    /// Set mtime to the file's current mtime plus one nanosecond.
    Increment,
}

/// Logging knobs from the `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Application name used as the log line / file prefix.
    pub ident: String,
    /// Directory for rolling log files; `None` logs to stdout only.
    pub dir:   Option<PathBuf>,
    /// Values above zero switch the level filter to debug.
    pub debug: u32,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            ident: "sfs-fuse".to_string(),
            dir:   None,
            debug: 0,
        }
    }
}

/// All tunables recognized in `.sfs.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Outbox directory where completed batches are published.
    pub batch_dir:          PathBuf,
    /// Staging directory where open batches are written. Must share a
    /// filesystem with `batch_dir` so publication renames stay atomic.
    pub batch_tmp_dir:      PathBuf,
    /// Pidfile location.
    pub pid_path:           PathBuf,
    /// Host identity embedded in batch names.
    pub node_name:          String,
    /// Events on paths starting with this prefix are suppressed.
    pub ignore_path_prefix: Option<String>,
    /// Age budget of an open batch before the flush timer rotates it.
    pub batch_flush:        Duration,
    /// Event-count rotation threshold.
    pub batch_max_events:   u64,
    /// Byte rotation threshold over data writes plus event lines.
    pub batch_max_bytes:    u64,
    /// Open staging files with `O_SYNC`.
    pub use_osync:          bool,
    /// Reject utimens calls that would move mtime backwards.
    pub forbid_older_mtime: bool,
    /// Mtime side effect for metadata-only changes.
    pub update_mtime:       UpdateMtime,
    /// `[log]` section.
    pub log:                LogSettings,
}

/// Partially parsed settings; `finish` enforces the required keys.
#[derive(Debug, Default)]
struct Draft {
    batch_dir:          Option<PathBuf>,
    batch_tmp_dir:      Option<PathBuf>,
    pid_path:           Option<PathBuf>,
    node_name:          Option<String>,
    ignore_path_prefix: Option<String>,
    batch_flush:        Option<Duration>,
    batch_max_events:   Option<u64>,
    batch_max_bytes:    Option<u64>,
    use_osync:          bool,
    forbid_older_mtime: bool,
    update_mtime:       UpdateMtime,
    log:                LogSettings,
}

impl Settings {
    /// Load and validate settings from an INI file.
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path).context(LoadConfigSnafu { path })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let mut draft = Draft::default();

        for (section, props) in ini.iter() {
            let section = section.unwrap_or_default();
            for (key, value) in props.iter() {
                draft.apply(section, key, value)?;
            }
        }

        draft.finish()
    }
}

impl Draft {
    fn apply(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        match (section, key) {
            ("sfs", "batch_dir") => self.batch_dir = Some(existing_dir(section, key, value)?),
            ("sfs", "batch_tmp_dir") => {
                self.batch_tmp_dir = Some(existing_dir(section, key, value)?);
            }
            ("sfs", "pid_path") => {
                self.pid_path = Some(PathBuf::from(non_empty(section, key, value)?));
            }
            ("sfs", "node_name") => {
                self.node_name = Some(non_empty(section, key, value)?.to_string());
            }
            ("sfs", "ignore_path_prefix") => {
                if !value.is_empty() {
                    self.ignore_path_prefix = Some(value.to_string());
                }
            }
            ("sfs", "batch_flush_msec") => {
                self.batch_flush = Some(Duration::from_millis(positive(section, key, value)?));
            }
            ("sfs", "batch_max_events") => {
                self.batch_max_events = Some(positive(section, key, value)?);
            }
            ("sfs", "batch_max_bytes") => {
                self.batch_max_bytes = Some(positive(section, key, value)?);
            }
            ("sfs", "use_osync") => self.use_osync = flag(section, key, value)?,
            ("sfs", "forbid_older_mtime") => self.forbid_older_mtime = flag(section, key, value)?,
            ("sfs", "update_mtime") => self.update_mtime = update_mtime(value),
            ("log", "ident") => self.log.ident = non_empty(section, key, value)?.to_string(),
            ("log", "facility") => {
                // Syslog facility from the original config format; logging
                // goes through tracing appenders, so the value is accepted
                // for compatibility and otherwise ignored.
                debug!(value, "ignoring log/facility");
            }
            ("log", "dir") => {
                if !value.is_empty() {
                    self.log.dir = Some(PathBuf::from(value));
                }
            }
            ("log", "debug") => {
                self.log.debug = value.parse().map_err(|_| {
                    InvalidValueSnafu {
                        section,
                        key,
                        value,
                        reason: "expected a non-negative integer",
                    }
                    .build()
                })?;
            }
            _ => return UnknownKeySnafu { section, key }.fail(),
        }
        Ok(())
    }

    fn finish(self) -> Result<Settings> {
        fn required<T>(value: Option<T>, key: &str) -> Result<T> {
            value.ok_or_else(|| {
                MissingKeySnafu {
                    section: "sfs",
                    key,
                }
                .build()
            })
        }

        Ok(Settings {
            batch_dir:          required(self.batch_dir, "batch_dir")?,
            batch_tmp_dir:      required(self.batch_tmp_dir, "batch_tmp_dir")?,
            pid_path:           required(self.pid_path, "pid_path")?,
            node_name:          required(self.node_name, "node_name")?,
            ignore_path_prefix: self.ignore_path_prefix,
            batch_flush:        required(self.batch_flush, "batch_flush_msec")?,
            batch_max_events:   required(self.batch_max_events, "batch_max_events")?,
            batch_max_bytes:    required(self.batch_max_bytes, "batch_max_bytes")?,
            use_osync:          self.use_osync,
            forbid_older_mtime: self.forbid_older_mtime,
            update_mtime:       self.update_mtime,
            log:                self.log,
        })
    }
}

fn non_empty<'v>(section: &str, key: &str, value: &'v str) -> Result<&'v str> {
    if value.is_empty() {
        return InvalidValueSnafu {
            section,
            key,
            value,
            reason: "must not be empty",
        }
        .fail();
    }
    Ok(value)
}

fn existing_dir(section: &str, key: &str, value: &str) -> Result<PathBuf> {
    let path = PathBuf::from(non_empty(section, key, value)?);
    if !path.is_dir() {
        return NotADirectorySnafu { section, key, path }.fail();
    }
    Ok(path)
}

fn positive(section: &str, key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => InvalidValueSnafu {
            section,
            key,
            value,
            reason: "must be an integer > 0",
        }
        .fail(),
    }
}

fn flag(section: &str, key: &str, value: &str) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => InvalidValueSnafu {
            section,
            key,
            value,
            reason: "must be 0 or 1",
        }
        .fail(),
    }
}

fn update_mtime(value: &str) -> UpdateMtime {
    match value {
        "no" => UpdateMtime::No,
        "touch" => UpdateMtime::Touch,
        "increment" => UpdateMtime::Increment,
        other => {
            warn!(value = other, "unknown update_mtime value, falling back to no");
            UpdateMtime::No
        }
    }
}
