//! Marker file records: canonical name encoding and queue ordering

use crate::error::{BrokerError, Result};
use regex_utils::marker_name::{self, Tag};
use std::cmp::Ordering;
use std::fmt;

/// Kind of marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// One unit of data within a lumisection
    Index,
    /// End of a lumisection
    EndOfLumiSection,
    /// End of the run
    EndOfRun,
    /// No record, a placeholder that never enters the queue
    Empty,
}

impl FileKind {
    /// Tag used in the canonical file name
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::EndOfLumiSection => "EoLS",
            Self::EndOfRun => "EoR",
            Self::Empty => "",
        }
    }

    // Position inside one lumisection
    fn rank(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Index => 1,
            Self::EndOfLumiSection => 2,
            Self::EndOfRun => 3,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One marker file found in a run directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRecord {
    pub run_number: u32,
    pub lumi_section: u32,
    /// Meaningful only for [`FileKind::Index`], zero otherwise
    pub index: u32,
    pub kind: FileKind,
}

impl FileRecord {
    /// An index file
    pub fn index(run_number: u32, lumi_section: u32, index: u32) -> Self {
        Self { run_number, lumi_section, index, kind: FileKind::Index }
    }

    /// An end-of-lumisection marker
    pub fn end_of_lumi_section(run_number: u32, lumi_section: u32) -> Self {
        Self { run_number, lumi_section, index: 0, kind: FileKind::EndOfLumiSection }
    }

    /// An end-of-run marker
    pub fn end_of_run(run_number: u32, lumi_section: u32) -> Self {
        Self { run_number, lumi_section, index: 0, kind: FileKind::EndOfRun }
    }

    /// The "no record" placeholder
    pub fn empty() -> Self {
        Self { run_number: 0, lumi_section: 0, index: 0, kind: FileKind::Empty }
    }

    /// Parse a marker file name, with or without its `.jsn`/`.raw` extension.
    ///
    /// Names must be canonical: re-formatting the parsed record has to give
    /// back the same stem, otherwise the broker would later rename a file
    /// that does not exist.
    pub fn parse(name: &str) -> Result<Self> {
        let parts = marker_name::split(name)
            .ok_or_else(|| BrokerError::parse(name, "not an index, EoLS or EoR file name"))?;

        let number = |digits: &str, what: &str| {
            digits
                .parse::<u32>()
                .map_err(|e| BrokerError::parse(name, format!("invalid {what} '{digits}': {e}")))
        };

        let run_number = number(parts.run, "run number")?;
        let lumi_section = number(parts.lumi_section, "lumisection")?;

        let record = match parts.tag {
            Tag::Index => {
                let digits = parts
                    .index
                    .ok_or_else(|| BrokerError::parse(name, "index file without index"))?;
                Self::index(run_number, lumi_section, number(digits, "index")?)
            }
            Tag::EndOfLumiSection => Self::end_of_lumi_section(run_number, lumi_section),
            Tag::EndOfRun => Self::end_of_run(run_number, lumi_section),
        };

        let stem = match parts.extension {
            Some(ext) => &name[..name.len() - ext.len() - 1],
            None => name,
        };
        if record.file_name() != stem {
            return Err(BrokerError::parse(
                name,
                format!("not in canonical form, expected '{}'", record.file_name()),
            ));
        }

        Ok(record)
    }

    /// Canonical file name without extension, empty for [`FileKind::Empty`]
    pub fn file_name(&self) -> String {
        match self.kind {
            FileKind::Empty => String::new(),
            FileKind::Index => format!(
                "run{:06}_ls{:04}_{}{:06}",
                self.run_number,
                self.lumi_section,
                self.kind.tag(),
                self.index
            ),
            FileKind::EndOfLumiSection | FileKind::EndOfRun => {
                format!("run{:06}_ls{:04}_{}", self.run_number, self.lumi_section, self.kind.tag())
            }
        }
    }

    pub fn is_end_of_lumi_section(&self) -> bool {
        self.kind == FileKind::EndOfLumiSection
    }

    pub fn is_end_of_run(&self) -> bool {
        self.kind == FileKind::EndOfRun
    }

    pub fn is_index(&self) -> bool {
        self.kind == FileKind::Index
    }

    pub fn is_empty(&self) -> bool {
        self.kind == FileKind::Empty
    }

    // EoR after everything, then lumisection, then kind, then index
    fn sort_key(&self) -> (bool, u32, u8, u32) {
        (self.is_end_of_run(), self.lumi_section, self.kind.rank(), self.index)
    }
}

impl Default for FileRecord {
    fn default() -> Self {
        Self::empty()
    }
}

// Comparing records of different runs is a programming error
impl Ord for FileRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(
            self.run_number, other.run_number,
            "comparing files of different runs: {self} vs {other}"
        );
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for FileRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}
