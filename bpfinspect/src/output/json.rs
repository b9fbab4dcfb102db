use std::fmt::Display;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Serialize, Serializer};

use super::{Formatter, TIME_FORMAT};
use crate::inspect::{MapEntry, MapRecord, ProgramRecord};

/// bpftool-compatible JSON. Byte strings are base64 encoded.
pub struct JsonFormatter {
    pub pretty: bool,
}

fn as_base64<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

fn as_base64_opt<S: Serializer>(bytes: &Option<&[u8]>, s: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => as_base64(b, s),
        None => s.serialize_none(),
    }
}

#[derive(Serialize)]
struct ProgramJson<'a> {
    id: u32,
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    tag: &'a str,
    gpl_compatible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    loaded_at: Option<String>,
    uid: u32,
    bytes_xlated: u32,
    bytes_jited: u32,
    bytes_memlock: u32,
    #[serde(skip_serializing_if = "<[u32]>::is_empty")]
    map_ids: &'a [u32],
    #[serde(skip_serializing_if = "<[PathBuf]>::is_empty")]
    pinned: &'a [PathBuf],
}

impl<'a> From<&'a ProgramRecord> for ProgramJson<'a> {
    fn from(p: &'a ProgramRecord) -> Self {
        Self {
            id: p.id,
            kind: &p.kind,
            name: &p.name,
            tag: &p.tag,
            gpl_compatible: p.gpl_compatible,
            loaded_at: p.loaded_at.map(|t| t.format(TIME_FORMAT).to_string()),
            uid: p.uid,
            bytes_xlated: p.bytes_xlated,
            bytes_jited: p.bytes_jited,
            bytes_memlock: p.bytes_memlock,
            map_ids: &p.map_ids,
            pinned: &p.pinned,
        }
    }
}

#[derive(Serialize)]
struct MapJson<'a> {
    id: u32,
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    flags: u32,
    bytes_memlock: u32,
    #[serde(skip_serializing_if = "<[PathBuf]>::is_empty")]
    pinned: &'a [PathBuf],
}

impl<'a> From<&'a MapRecord> for MapJson<'a> {
    fn from(m: &'a MapRecord) -> Self {
        Self {
            id: m.id,
            kind: &m.kind,
            name: &m.name,
            key_size: m.key_size,
            value_size: m.value_size,
            max_entries: m.max_entries,
            flags: m.flags,
            bytes_memlock: m.bytes_memlock,
            pinned: &m.pinned,
        }
    }
}

#[derive(Serialize)]
struct EntryJson<'a> {
    #[serde(serialize_with = "as_base64")]
    key: &'a [u8],
    #[serde(serialize_with = "as_base64")]
    value: &'a [u8],
}

impl<'a> From<&'a MapEntry> for EntryJson<'a> {
    fn from(e: &'a MapEntry) -> Self {
        Self {
            key: &e.key,
            value: &e.value,
        }
    }
}

#[derive(Serialize)]
struct NextKeyJson<'a> {
    #[serde(serialize_with = "as_base64_opt", skip_serializing_if = "Option::is_none")]
    key: Option<&'a [u8]>,
    #[serde(serialize_with = "as_base64")]
    next_key: &'a [u8],
}

impl JsonFormatter {
    fn marshal<T: Serialize>(&self, value: &T) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        result.unwrap_or_else(|e| format!(r#"{{"error":"failed to marshal JSON: {e}"}}"#))
    }
}

#[derive(Serialize)]
struct ProgramsJson<'a> {
    programs: Vec<ProgramJson<'a>>,
}

#[derive(Serialize)]
struct MapsJson<'a> {
    maps: Vec<MapJson<'a>>,
}

#[derive(Serialize)]
struct EntriesJson<'a> {
    entries: Vec<EntryJson<'a>>,
    count: usize,
}

#[derive(Serialize)]
struct ErrorJson {
    error: String,
}

impl Formatter for JsonFormatter {
    fn programs(&self, programs: &[ProgramRecord]) -> String {
        self.marshal(&ProgramsJson {
            programs: programs.iter().map(ProgramJson::from).collect(),
        })
    }

    fn maps(&self, maps: &[MapRecord]) -> String {
        self.marshal(&MapsJson {
            maps: maps.iter().map(MapJson::from).collect(),
        })
    }

    fn map_entries(&self, entries: &[MapEntry]) -> String {
        self.marshal(&EntriesJson {
            entries: entries.iter().map(EntryJson::from).collect(),
            count: entries.len(),
        })
    }

    fn map_entry(&self, entry: &MapEntry) -> String {
        self.marshal(&EntryJson::from(entry))
    }

    fn next_key(&self, key: Option<&[u8]>, next_key: &[u8]) -> String {
        self.marshal(&NextKeyJson { key, next_key })
    }

    fn error(&self, err: &dyn Display) -> String {
        self.marshal(&ErrorJson {
            error: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::super::fixtures;
    use super::*;

    const COMPACT: JsonFormatter = JsonFormatter { pretty: false };

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn empty_lists() {
        assert_eq!(COMPACT.programs(&[]), r#"{"programs":[]}"#);
        assert_eq!(COMPACT.maps(&[]), r#"{"maps":[]}"#);
    }

    #[test]
    fn program_fields() {
        let v = parse(&COMPACT.programs(&[fixtures::program(185, vec![1, 2, 3])]));
        let p = &v["programs"][0];
        assert_eq!(p["id"], 185);
        assert_eq!(p["type"], "sched_cls");
        assert_eq!(p["name"], "my_prog");
        assert_eq!(p["gpl_compatible"], true);
        assert_eq!(p["map_ids"], serde_json::json!([1, 2, 3]));
        assert!(p["loaded_at"].as_str().unwrap().starts_with("2025-11-2"));
        assert!(p.get("pinned").is_none());
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let mut prog = fixtures::program(1, Vec::new());
        prog.loaded_at = None;
        let v = parse(&COMPACT.programs(&[prog]));
        let p = v["programs"][0].as_object().unwrap();
        assert!(!p.contains_key("map_ids"));
        assert!(!p.contains_key("loaded_at"));
    }

    #[test]
    fn map_fields() {
        let v = parse(&COMPACT.maps(&[fixtures::map(10)]));
        let m = &v["maps"][0];
        assert_eq!(m["id"], 10);
        assert_eq!(m["type"], "hash");
        assert_eq!(m["key_size"], 4);
        assert_eq!(m["value_size"], 8);
        assert_eq!(m["pinned"], serde_json::json!(["/sys/fs/bpf/some_map"]));
    }

    #[test]
    fn entries_are_base64() {
        let v = parse(&COMPACT.map_entries(&[fixtures::entry()]));
        assert_eq!(v["count"], 1);
        assert_eq!(v["entries"][0]["key"], "AAECAw==");
        assert_eq!(v["entries"][0]["value"], "AAECAwQFBgc=");

        assert_eq!(
            COMPACT.map_entries(&[]),
            r#"{"entries":[],"count":0}"#
        );
        assert_eq!(
            COMPACT.map_entry(&fixtures::entry()),
            r#"{"key":"AAECAw==","value":"AAECAwQFBgc="}"#
        );
    }

    #[test]
    fn next_key_omits_missing_key() {
        assert_eq!(COMPACT.next_key(None, &[0, 1, 2, 3]), r#"{"next_key":"AAECAw=="}"#);
        assert_eq!(
            COMPACT.next_key(Some(&[0, 1, 2, 3]), &[0, 1, 2, 3]),
            r#"{"key":"AAECAw==","next_key":"AAECAw=="}"#
        );
    }

    #[test]
    fn pretty_is_indented() {
        let out = JsonFormatter { pretty: true }.maps(&[]);
        assert_eq!(out, "{\n  \"maps\": []\n}");
    }
}
