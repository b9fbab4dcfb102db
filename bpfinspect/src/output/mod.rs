pub mod json;
pub mod plain;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::inspect::{MapEntry, MapRecord, ProgramRecord};

/// Timestamp layout shared by both formats, e.g. `2025-11-24T05:50:46+0000`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Plain,
    Json,
    /// Indented JSON.
    Pretty,
}

/// Renders command results. Output carries no trailing newline.
pub trait Formatter {
    fn programs(&self, programs: &[ProgramRecord]) -> String;

    fn maps(&self, maps: &[MapRecord]) -> String;

    /// All entries of a map, as printed by `map dump`.
    fn map_entries(&self, entries: &[MapEntry]) -> String;

    /// A single entry, as printed by `map lookup`.
    fn map_entry(&self, entry: &MapEntry) -> String;

    fn next_key(&self, key: Option<&[u8]>, next_key: &[u8]) -> String;

    fn error(&self, err: &dyn Display) -> String;
}

pub fn new_formatter(format: Format) -> Box<dyn Formatter> {
    match format {
        Format::Plain => Box::new(plain::PlainFormatter),
        Format::Json => Box::new(json::JsonFormatter { pretty: false }),
        Format::Pretty => Box::new(json::JsonFormatter { pretty: true }),
    }
}
