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

use std::path::PathBuf;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Cannot load config {path:?}"))]
    LoadConfig {
        path:   PathBuf,
        source: ini::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Unknown config key {section}/{key}"))]
    UnknownKey {
        section: String,
        key:     String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Config key {section}/{key} must be specified"))]
    MissingKey {
        section: String,
        key:     String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Invalid value {value:?} for config key {section}/{key}: {reason}"))]
    InvalidValue {
        section: String,
        key:     String,
        value:   String,
        reason:  String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Config key {section}/{key} points to {path:?}, which is not a directory"))]
    NotADirectory {
        section: String,
        key:     String,
        path:    PathBuf,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },
}
