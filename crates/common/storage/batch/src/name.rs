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

//! Deterministic batch file naming.
//!
//! A published batch is named
//! `<sec>_<node>_<host>_<pid>_<subid:05>_<mode>.batch`. Consumers sort the
//! outbox lexicographically to process batches in causal order, so the name
//! layout is a wire contract.

use std::fmt;

/// Consumer-visible event mode tag.
///
/// `NoRec` marks a single-entry change; `Rec` marks the root of a subtree
/// the consumer must re-examine recursively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    NoRec,
    Rec,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoRec => "norec",
            Self::Rec => "rec",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Filename suffix shared by staging and published batches.
pub const BATCH_SUFFIX: &str = ".batch";

/// Whether a directory entry name belongs to the batch stream.
#[must_use]
pub fn is_batch_file(name: &str) -> bool { name.ends_with(BATCH_SUFFIX) }

/// Identity of one batch file, fixed at creation time.
///
/// The staging filename and the published filename are identical; only the
/// containing directory differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchName {
    pub sec:   i64,
    pub node:  String,
    pub host:  String,
    pub pid:   u32,
    pub subid: u32,
    pub mode:  Mode,
}

impl BatchName {
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{:05}_{}{}",
            self.sec, self.node, self.host, self.pid, self.subid, self.mode, BATCH_SUFFIX
        )
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn name(sec: i64, subid: u32, mode: Mode) -> BatchName {
        BatchName {
            sec,
            node: "node1".to_string(),
            host: "hostA".to_string(),
            pid: 4242,
            subid,
            mode,
        }
    }

    #[test]
    fn test_file_name_layout() {
        let n = name(1_400_000_000, 7, Mode::NoRec);
        assert_eq!(n.file_name(), "1400000000_node1_hostA_4242_00007_norec.batch");
    }

    #[test]
    fn test_rec_mode_tag() {
        let n = name(1_400_000_000, 0, Mode::Rec);
        assert_eq!(n.file_name(), "1400000000_node1_hostA_4242_00000_rec.batch");
    }

    #[test]
    fn test_lexicographic_order_follows_subid_within_a_second() {
        let earlier = name(1_400_000_000, 1, Mode::NoRec).file_name();
        let later = name(1_400_000_000, 2, Mode::NoRec).file_name();
        assert!(earlier < later);
    }

    #[test]
    fn test_lexicographic_order_follows_seconds() {
        let earlier = name(1_400_000_000, 99, Mode::NoRec).file_name();
        let later = name(1_400_000_001, 0, Mode::NoRec).file_name();
        assert!(earlier < later);
    }

    #[test_case("1400000000_n_h_1_00000_norec.batch", true ; "published batch")]
    #[test_case("x.batch", true ; "any batch suffix")]
    #[test_case("1400000000_n_h_1_00000_norec.batch.tmp", false ; "trailing junk")]
    #[test_case("notes.txt", false ; "unrelated file")]
    fn test_is_batch_file(name: &str, expected: bool) {
        assert_eq!(is_batch_file(name), expected);
    }
}
