//! Read-only views of the programs and maps loaded in the kernel.

pub mod map;
pub mod pins;
pub mod prog;
mod sys;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::InspectError;

/// Metadata for one loaded program, in the shape `prog show` prints it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramRecord {
    pub id: u32,
    /// bpftool-style type name, e.g. `xdp` or `sched_cls`.
    pub kind: String,
    pub name: String,
    /// The 8-byte program tag as 16 lowercase hex characters.
    pub tag: String,
    pub gpl_compatible: bool,
    pub loaded_at: Option<DateTime<Local>>,
    pub uid: u32,
    pub bytes_xlated: u32,
    pub bytes_jited: u32,
    pub bytes_memlock: u32,
    pub map_ids: Vec<u32>,
    pub pinned: Vec<PathBuf>,
}

/// Metadata for one loaded map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord {
    pub id: u32,
    pub kind: String,
    pub name: String,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub flags: u32,
    pub bytes_memlock: u32,
    pub pinned: Vec<PathBuf>,
}

/// A raw key/value pair read out of a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

pub trait ProgramService {
    /// Every program the caller can see.
    fn list(&self) -> Result<Vec<ProgramRecord>, InspectError>;

    fn get_by_id(&self, id: u32) -> Result<ProgramRecord, InspectError>;

    fn get_by_pinned_path(&self, path: &Path) -> Result<ProgramRecord, InspectError>;

    fn get_by_tag(&self, tag: &str) -> Result<Vec<ProgramRecord>, InspectError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.tag.eq_ignore_ascii_case(tag))
            .collect())
    }

    fn get_by_name(&self, name: &str) -> Result<Vec<ProgramRecord>, InspectError> {
        Ok(self.list()?.into_iter().filter(|p| p.name == name).collect())
    }
}

pub trait MapService {
    fn list(&self) -> Result<Vec<MapRecord>, InspectError>;

    fn get_by_id(&self, id: u32) -> Result<MapRecord, InspectError>;

    fn get_by_pinned_path(&self, path: &Path) -> Result<MapRecord, InspectError>;

    fn get_by_name(&self, name: &str) -> Result<Vec<MapRecord>, InspectError> {
        Ok(self.list()?.into_iter().filter(|m| m.name == name).collect())
    }

    /// All entries currently in the map.
    fn dump(&self, id: u32) -> Result<Vec<MapEntry>, InspectError>;

    /// Value stored under `key`; the key must be exactly `key_size` bytes.
    fn lookup(&self, id: u32, key: &[u8]) -> Result<Vec<u8>, InspectError>;

    /// The key following `key`, or the first key when `key` is `None`.
    fn get_next_key(&self, id: u32, key: Option<&[u8]>) -> Result<Vec<u8>, InspectError>;
}
