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

//! Shared, hot-reloadable view of the settings.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use tracing::{info, warn};

use crate::{Result, settings::Settings};

type ReloadCallback = Box<dyn Fn(&Settings) + Send + Sync>;

/// Owner of the current [`Settings`] snapshot.
///
/// Readers take cheap `Arc` clones; a snapshot stays internally consistent
/// for as long as the caller holds it. Reloads are serialized by a dedicated
/// lock so the parse-validate-swap sequence of two concurrent reload
/// triggers cannot interleave.
pub struct ConfigHandle {
    path:        PathBuf,
    current:     RwLock<Arc<Settings>>,
    reload_lock: Mutex<()>,
    on_reload:   RwLock<Option<ReloadCallback>>,
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("path", &self.path)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ConfigHandle {
    /// Load the config file and wrap it in a shared handle.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Settings::load(&path)?;
        info!(path = ?path, "Config loaded");
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(settings)),
            reload_lock: Mutex::new(()),
            on_reload: RwLock::new(None),
        })
    }

    /// The current settings snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read().expect("config lock poisoned"))
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Register a callback invoked with every successfully reloaded
    /// settings snapshot (after the swap).
    pub fn set_on_reload(&self, callback: impl Fn(&Settings) + Send + Sync + 'static) {
        *self.on_reload.write().expect("config lock poisoned") = Some(Box::new(callback));
    }

    /// Re-read the config file and swap in the new settings.
    ///
    /// On any parse or validation failure the previous settings are
    /// retained unchanged and the failure is logged.
    pub fn reload(&self) -> Result<()> {
        let _serialize = self.reload_lock.lock().expect("config lock poisoned");
        info!(path = ?self.path, "Reloading config");

        match Settings::load(&self.path) {
            Ok(settings) => {
                let settings = Arc::new(settings);
                *self.current.write().expect("config lock poisoned") = Arc::clone(&settings);
                if let Some(callback) = &*self.on_reload.read().expect("config lock poisoned") {
                    callback(&settings);
                }
                info!(path = ?self.path, "Config reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Config reload failed, keeping previous settings");
                Err(e)
            }
        }
    }
}
