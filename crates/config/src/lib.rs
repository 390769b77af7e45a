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

//! Typed settings for the sfs daemon.
//!
//! Settings live in an INI file at `<rootdir>/.sfs.conf`. The file is loaded
//! once at startup (a failure aborts the process) and hot-reloaded whenever
//! the filesystem layer observes a write to it through the mount. A failed
//! reload keeps the previous settings untouched.

mod error;
mod handle;
mod settings;

pub use error::{Error, Result};
pub use handle::ConfigHandle;
pub use settings::{CONFIG_FILE_NAME, LogSettings, Settings, UpdateMtime};
