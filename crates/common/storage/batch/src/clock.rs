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

//! Never-regressing timestamp source.
//!
//! Batch filenames embed the integral seconds of their creation time and
//! must stay unique and monotone per host. A wall clock stepped backwards
//! (ntp, operator) would reuse seconds and collide with already-published
//! names, so a regression is absorbed by replaying the last returned value.

use std::sync::Mutex;

use chrono::Utc;

/// A `(seconds, nanoseconds)` wall-clock instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec:  i64,
    pub nsec: u32,
}

/// Monotonic-by-construction clock.
///
/// `now()` is guaranteed non-decreasing across consecutive calls on the same
/// instance.
#[derive(Debug, Default)]
pub struct Clock {
    last: Mutex<Timespec>,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Current time, clamped so it never regresses below an earlier result.
    pub fn now(&self) -> Timespec {
        let wall = Utc::now();
        let current = Timespec {
            sec:  wall.timestamp(),
            nsec: wall.timestamp_subsec_nanos(),
        };

        let mut last = self.last.lock().expect("clock lock poisoned");
        if current < *last {
            return *last;
        }
        *last = current;
        current
    }
}
