//! Regex utilities for the BUFU file broker
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Directory filters selecting the marker files a run directory observer cares about.
///
/// Each filter accepts the EoLS and EoR markers (always `.jsn`) plus index
/// files of exactly one extension family.
pub mod marker_filter {
    use super::*;

    /// Index files written as `.jsn`
    pub static JSN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^run[0-9]+_ls[0-9]+_(?:EoR\.jsn|EoLS\.jsn|index[0-9]+\.jsn)$")
            .expect("Invalid regex pattern")
    });

    /// Index files written as `.raw`
    pub static RAW: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^run[0-9]+_ls[0-9]+_(?:EoR\.jsn|EoLS\.jsn|index[0-9]+\.raw)$")
            .expect("Invalid regex pattern")
    });
}

/// Structured parsing of a marker file name
pub mod marker_name {
    use super::*;

    /// Captures: `run`, `ls`, then one of `index` / `eols` / `eor`, and an optional `ext`
    pub static PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^run(?P<run>[0-9]+)_ls(?P<ls>[0-9]+)_(?:index(?P<index>[0-9]+)|(?P<eols>EoLS)|(?P<eor>EoR))(?:\.(?P<ext>jsn|raw))?$",
        )
        .expect("Invalid regex pattern")
    });

    /// The kind tag found in a marker name
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Tag {
        Index,
        EndOfLumiSection,
        EndOfRun,
    }

    /// Raw pieces of a marker name, digits still as text
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Parts<'a> {
        pub run: &'a str,
        pub lumi_section: &'a str,
        pub index: Option<&'a str>,
        pub tag: Tag,
        pub extension: Option<&'a str>,
    }

    /// Split a marker name into its parts, `None` when the name has none of the three shapes
    pub fn split(name: &str) -> Option<Parts<'_>> {
        let caps = PATTERN.captures(name)?;

        let tag = if caps.name("index").is_some() {
            Tag::Index
        } else if caps.name("eols").is_some() {
            Tag::EndOfLumiSection
        } else {
            Tag::EndOfRun
        };

        Some(Parts {
            run: caps.name("run")?.as_str(),
            lumi_section: caps.name("ls")?.as_str(),
            index: caps.name("index").map(|m| m.as_str()),
            tag,
            extension: caps.name("ext").map(|m| m.as_str()),
        })
    }
}
