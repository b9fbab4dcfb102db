use std::fmt::{Display, Write as _};

use super::{Formatter, TIME_FORMAT};
use crate::hex::format_hex_bytes;
use crate::inspect::{MapEntry, MapRecord, ProgramRecord};

/// bpftool's human-readable layout.
pub struct PlainFormatter;

impl PlainFormatter {
    fn program(out: &mut String, p: &ProgramRecord) {
        let gpl = if p.gpl_compatible { "  gpl" } else { "" };
        let _ = writeln!(out, "{}: {}  name {}  tag {}{gpl}", p.id, p.kind, p.name, p.tag);

        let loaded_at = p
            .loaded_at
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(out, "\tloaded_at {loaded_at}  uid {}", p.uid);

        let _ = write!(
            out,
            "\txlated {}B  jited {}B  memlock {}B",
            p.bytes_xlated, p.bytes_jited, p.bytes_memlock
        );
        if !p.map_ids.is_empty() {
            let ids: Vec<String> = p.map_ids.iter().map(u32::to_string).collect();
            let _ = write!(out, "  map_ids {}", ids.join(","));
        }
        for path in &p.pinned {
            let _ = write!(out, "\n\tpinned {}", path.display());
        }
    }

    fn map(out: &mut String, m: &MapRecord) {
        let _ = writeln!(out, "{}: {}  name {}  flags 0x{:x}", m.id, m.kind, m.name, m.flags);
        let _ = write!(
            out,
            "\tkey {}B  value {}B  max_entries {}  memlock {}B",
            m.key_size, m.value_size, m.max_entries, m.bytes_memlock
        );
        for path in &m.pinned {
            let _ = write!(out, "\n\tpinned {}", path.display());
        }
    }
}

fn records<T>(items: &[T], render: fn(&mut String, &T)) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render(&mut out, item);
    }
    out
}

impl Formatter for PlainFormatter {
    fn programs(&self, programs: &[ProgramRecord]) -> String {
        records(programs, Self::program)
    }

    fn maps(&self, maps: &[MapRecord]) -> String {
        records(maps, Self::map)
    }

    fn map_entries(&self, entries: &[MapEntry]) -> String {
        let mut out = String::new();
        for e in entries {
            let _ = writeln!(
                out,
                "key: {}  value: {}",
                format_hex_bytes(&e.key),
                format_hex_bytes(&e.value)
            );
        }
        let plural = if entries.len() == 1 { "" } else { "s" };
        let _ = write!(out, "Found {} element{plural}", entries.len());
        out
    }

    fn map_entry(&self, entry: &MapEntry) -> String {
        format!(
            "key: {} value: {}",
            format_hex_bytes(&entry.key),
            format_hex_bytes(&entry.value)
        )
    }

    fn next_key(&self, key: Option<&[u8]>, next_key: &[u8]) -> String {
        let mut out = String::new();
        if let Some(key) = key {
            let _ = writeln!(out, "key:\n{}", format_hex_bytes(key));
        }
        let _ = write!(out, "next key:\n{}", format_hex_bytes(next_key));
        out
    }

    fn error(&self, err: &dyn Display) -> String {
        format!("Error: {err}")
    }
}
