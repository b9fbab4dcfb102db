use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

use aya::maps::{loaded_maps, MapInfo, MapType};

use super::pins::PinScanner;
use super::sys;
use super::{MapEntry, MapRecord, MapService};
use crate::error::{bpffs_mounted, is_not_found_error, is_permission_error, InspectError};

/// Maps as the kernel reports them through `BPF_MAP_GET_NEXT_ID`.
pub struct KernelMaps {
    pins: PinScanner,
}

impl KernelMaps {
    pub fn new(bpffs_root: impl Into<PathBuf>) -> Self {
        Self {
            pins: PinScanner::new(bpffs_root),
        }
    }

    fn open(&self, id: u32) -> Result<MapInfo, InspectError> {
        MapInfo::from_id(id)
            .map_err(|e| InspectError::from(e).classify(format!("map with ID {id}")))
    }

    fn record(&self, info: &MapInfo) -> MapRecord {
        let id = info.id();
        let bytes_memlock = info
            .fd()
            .ok()
            .and_then(|fd| sys::fdinfo_field(fd.as_fd(), "memlock"))
            .unwrap_or(0);
        MapRecord {
            id,
            kind: info.map_type().map_or("unknown", map_type_name).to_string(),
            name: info.name_as_str().unwrap_or_default().to_string(),
            key_size: info.key_size(),
            value_size: info.value_size(),
            max_entries: info.max_entries(),
            flags: info.map_flags(),
            bytes_memlock,
            pinned: self.pins.index().map_paths(id),
        }
    }
}

/// Size of the buffer a lookup writes into.
///
/// Per-CPU maps return one value per possible CPU, each padded to 8 bytes.
fn value_buffer_len(info: &MapInfo) -> Result<usize, InspectError> {
    let value_size = info.value_size() as usize;
    match info.map_type() {
        Ok(kind) if is_per_cpu(kind) => {
            let cpus = sys::possible_cpus().map_err(|io_error| InspectError::Syscall {
                call: "possible_cpus",
                io_error,
            })?;
            Ok(value_size.next_multiple_of(8) * cpus)
        }
        _ => Ok(value_size),
    }
}

fn is_per_cpu(kind: MapType) -> bool {
    matches!(
        kind,
        MapType::PerCpuHash
            | MapType::PerCpuArray
            | MapType::LruPerCpuHash
            | MapType::PerCpuCgroupStorage
    )
}

fn check_key(info: &MapInfo, key: &[u8]) -> Result<(), InspectError> {
    let expected = info.key_size() as usize;
    if key.len() != expected {
        return Err(InspectError::InvalidKey(format!(
            "key must be {expected} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

impl MapService for KernelMaps {
    fn list(&self) -> Result<Vec<MapRecord>, InspectError> {
        let mut maps = Vec::new();
        for (i, result) in loaded_maps().enumerate() {
            match result {
                Ok(info) => maps.push(self.record(&info)),
                Err(e) => {
                    let e = InspectError::from(e);
                    if is_permission_error(&e) || (i == 0 && !is_not_found_error(&e)) {
                        return Err(e.classify("maps"));
                    }
                    log::debug!("skipping map: {e}");
                }
            }
        }
        Ok(maps)
    }

    fn get_by_id(&self, id: u32) -> Result<MapRecord, InspectError> {
        let info = self.open(id)?;
        Ok(self.record(&info))
    }

    fn get_by_pinned_path(&self, path: &Path) -> Result<MapRecord, InspectError> {
        let what = format!("map pinned at {}", path.display());
        if !path.exists() {
            if !bpffs_mounted(self.pins.root()) {
                return Err(InspectError::BpffsNotMounted(
                    self.pins.root().display().to_string(),
                ));
            }
            return Err(InspectError::NotFound(what));
        }
        let info = MapInfo::from_pin(path).map_err(|e| InspectError::from(e).classify(what))?;
        Ok(self.record(&info))
    }

    fn dump(&self, id: u32) -> Result<Vec<MapEntry>, InspectError> {
        let info = self.open(id)?;
        let fd = info.fd()?;
        let what = format!("map with ID {id}");
        let value_len = value_buffer_len(&info)?;

        let mut entries = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        loop {
            let mut next = vec![0u8; info.key_size() as usize];
            let found = sys::map_get_next_key(fd.as_fd(), current.as_deref(), &mut next)
                .map_err(|e| e.classify(what.as_str()))?;
            if !found {
                break;
            }
            let mut value = vec![0u8; value_len];
            if sys::map_lookup_elem(fd.as_fd(), &next, &mut value)
                .map_err(|e| e.classify(what.as_str()))?
            {
                entries.push(MapEntry {
                    key: next.clone(),
                    value,
                });
            } else {
                log::debug!("key deleted during dump of map {id}");
            }
            current = Some(next);
        }
        Ok(entries)
    }

    fn lookup(&self, id: u32, key: &[u8]) -> Result<Vec<u8>, InspectError> {
        let info = self.open(id)?;
        check_key(&info, key)?;
        let fd = info.fd()?;
        let mut value = vec![0u8; value_buffer_len(&info)?];
        if sys::map_lookup_elem(fd.as_fd(), key, &mut value)
            .map_err(|e| e.classify(format!("map with ID {id}")))?
        {
            Ok(value)
        } else {
            Err(InspectError::KeyNotFound)
        }
    }

    fn get_next_key(&self, id: u32, key: Option<&[u8]>) -> Result<Vec<u8>, InspectError> {
        let info = self.open(id)?;
        if let Some(key) = key {
            check_key(&info, key)?;
        }
        let fd = info.fd()?;
        let mut next = vec![0u8; info.key_size() as usize];
        if sys::map_get_next_key(fd.as_fd(), key, &mut next)
            .map_err(|e| e.classify(format!("map with ID {id}")))?
        {
            Ok(next)
        } else if key.is_some() {
            Err(InspectError::NoMoreKeys)
        } else {
            Err(InspectError::MapEmpty)
        }
    }
}

/// The name bpftool prints for a map type.
pub fn map_type_name(kind: MapType) -> &'static str {
    match kind {
        MapType::Unspecified => "unspec",
        MapType::Hash => "hash",
        MapType::Array => "array",
        MapType::ProgramArray => "prog_array",
        MapType::PerfEventArray => "perf_event_array",
        MapType::PerCpuHash => "percpu_hash",
        MapType::PerCpuArray => "percpu_array",
        MapType::StackTrace => "stack_trace",
        MapType::CgroupArray => "cgroup_array",
        MapType::LruHash => "lru_hash",
        MapType::LruPerCpuHash => "lru_percpu_hash",
        MapType::LpmTrie => "lpm_trie",
        MapType::ArrayOfMaps => "array_of_maps",
        MapType::HashOfMaps => "hash_of_maps",
        MapType::DevMap => "devmap",
        MapType::SockMap => "sockmap",
        MapType::CpuMap => "cpumap",
        MapType::XskMap => "xskmap",
        MapType::SockHash => "sockhash",
        MapType::CgroupStorage => "cgroup_storage",
        MapType::ReuseportSockArray => "reuseport_sockarray",
        MapType::PerCpuCgroupStorage => "percpu_cgroup_storage",
        MapType::Queue => "queue",
        MapType::Stack => "stack",
        MapType::SkStorage => "sk_storage",
        MapType::DevMapHash => "devmap_hash",
        MapType::StructOps => "struct_ops",
        MapType::RingBuf => "ringbuf",
        MapType::InodeStorage => "inode_storage",
        MapType::TaskStorage => "task_storage",
        MapType::BloomFilter => "bloom_filter",
        MapType::UserRingBuf => "user_ringbuf",
        MapType::CgrpStorage => "cgrp_storage",
        MapType::Arena => "arena",
        _ => "unknown",
    }
}
