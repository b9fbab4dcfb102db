use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aya::maps::MapInfo;
use aya::programs::ProgramInfo;

/// What a file under bpffs turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedObject {
    Program(u32),
    Map(u32),
}

/// Identifies the object pinned at a path, if any.
pub trait PinProbe {
    fn probe(&self, path: &Path) -> Option<PinnedObject>;
}

/// Asks the kernel via `BPF_OBJ_GET`.
pub struct KernelProbe;

impl PinProbe for KernelProbe {
    fn probe(&self, path: &Path) -> Option<PinnedObject> {
        if let Ok(info) = ProgramInfo::from_pin(path) {
            return Some(PinnedObject::Program(info.id()));
        }
        MapInfo::from_pin(path)
            .ok()
            .map(|info| PinnedObject::Map(info.id()))
    }
}

/// Object ID to pinned paths, built from one walk of the bpffs tree.
#[derive(Debug, Default, Clone)]
pub struct PinIndex {
    programs: HashMap<u32, Vec<PathBuf>>,
    maps: HashMap<u32, Vec<PathBuf>>,
}

impl PinIndex {
    pub fn scan(root: &Path, probe: &dyn PinProbe) -> Self {
        let mut index = Self::default();
        if !root.exists() {
            log::debug!("bpffs root {} does not exist, no pins", root.display());
            return index;
        }
        index.walk(root, probe);
        index
    }

    fn walk(&mut self, dir: &Path, probe: &dyn PinProbe) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("skipping {}: {e}", dir.display());
                return;
            }
        };
        let mut paths: Vec<(PathBuf, bool)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let is_dir = e.file_type().ok()?.is_dir();
                Some((e.path(), is_dir))
            })
            .collect();
        paths.sort();

        for (path, is_dir) in paths {
            if is_dir {
                self.walk(&path, probe);
                continue;
            }
            match probe.probe(&path) {
                Some(PinnedObject::Program(id)) => self.programs.entry(id).or_default().push(path),
                Some(PinnedObject::Map(id)) => self.maps.entry(id).or_default().push(path),
                None => {}
            }
        }
    }

    pub fn program_paths(&self, id: u32) -> Vec<PathBuf> {
        self.programs.get(&id).cloned().unwrap_or_default()
    }

    pub fn map_paths(&self, id: u32) -> Vec<PathBuf> {
        self.maps.get(&id).cloned().unwrap_or_default()
    }
}

/// Lazily scans the bpffs tree the first time a pinned path is asked for.
pub struct PinScanner<P: PinProbe = KernelProbe> {
    root: PathBuf,
    probe: P,
    index: OnceLock<PinIndex>,
}

impl PinScanner<KernelProbe> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_probe(root, KernelProbe)
    }
}

impl<P: PinProbe> PinScanner<P> {
    pub fn with_probe(root: impl Into<PathBuf>, probe: P) -> Self {
        Self {
            root: root.into(),
            probe,
            index: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &PinIndex {
        self.index
            .get_or_init(|| PinIndex::scan(&self.root, &self.probe))
    }
}
