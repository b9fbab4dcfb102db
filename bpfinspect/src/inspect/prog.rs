use std::path::{Path, PathBuf};

use aya::programs::{loaded_programs, ProgramInfo, ProgramType};
use chrono::{DateTime, Local};

use super::pins::PinScanner;
use super::{ProgramRecord, ProgramService};
use crate::error::{bpffs_mounted, is_not_found_error, is_permission_error, InspectError};

/// Programs as the kernel reports them through `BPF_PROG_GET_NEXT_ID`.
pub struct KernelPrograms {
    pins: PinScanner,
}

impl KernelPrograms {
    pub fn new(bpffs_root: impl Into<PathBuf>) -> Self {
        Self {
            pins: PinScanner::new(bpffs_root),
        }
    }

    fn record(&self, info: &ProgramInfo) -> ProgramRecord {
        let id = info.id();
        ProgramRecord {
            id,
            kind: info
                .program_type()
                .map_or("unknown", program_type_name)
                .to_string(),
            name: info.name_as_str().unwrap_or_default().to_string(),
            tag: format!("{:016x}", info.tag()),
            gpl_compatible: info.gpl_compatible().unwrap_or(false),
            loaded_at: info.loaded_at().map(DateTime::<Local>::from),
            uid: info.created_by_uid().unwrap_or(0),
            bytes_xlated: info.size_translated().unwrap_or(0),
            bytes_jited: info.size_jitted(),
            bytes_memlock: info.memory_locked().unwrap_or(0),
            map_ids: info.map_ids().ok().flatten().unwrap_or_default(),
            pinned: self.pins.index().program_paths(id),
        }
    }
}

impl ProgramService for KernelPrograms {
    fn list(&self) -> Result<Vec<ProgramRecord>, InspectError> {
        let mut programs = Vec::new();
        for (i, result) in loaded_programs().enumerate() {
            match result {
                Ok(info) => programs.push(self.record(&info)),
                Err(e) => {
                    let e = InspectError::from(e);
                    // A failure on the first ID means iteration itself is blocked.
                    if is_permission_error(&e) || (i == 0 && !is_not_found_error(&e)) {
                        return Err(e.classify("programs"));
                    }
                    log::debug!("skipping program: {e}");
                }
            }
        }
        Ok(programs)
    }

    fn get_by_id(&self, id: u32) -> Result<ProgramRecord, InspectError> {
        self.list()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| InspectError::NotFound(format!("program with ID {id}")))
    }

    fn get_by_pinned_path(&self, path: &Path) -> Result<ProgramRecord, InspectError> {
        let what = format!("program pinned at {}", path.display());
        if !path.exists() {
            if !bpffs_mounted(self.pins.root()) {
                return Err(InspectError::BpffsNotMounted(
                    self.pins.root().display().to_string(),
                ));
            }
            return Err(InspectError::NotFound(what));
        }
        let info =
            ProgramInfo::from_pin(path).map_err(|e| InspectError::from(e).classify(what))?;
        Ok(self.record(&info))
    }
}

/// The name bpftool prints for a program type.
pub fn program_type_name(kind: ProgramType) -> &'static str {
    match kind {
        ProgramType::Unspecified => "unspec",
        ProgramType::SocketFilter => "socket_filter",
        ProgramType::KProbe => "kprobe",
        ProgramType::SchedClassifier => "sched_cls",
        ProgramType::SchedAction => "sched_act",
        ProgramType::TracePoint => "tracepoint",
        ProgramType::Xdp => "xdp",
        ProgramType::PerfEvent => "perf_event",
        ProgramType::CgroupSkb => "cgroup_skb",
        ProgramType::CgroupSock => "cgroup_sock",
        ProgramType::LwtInput => "lwt_in",
        ProgramType::LwtOutput => "lwt_out",
        ProgramType::LwtXmit => "lwt_xmit",
        ProgramType::SockOps => "sock_ops",
        ProgramType::SkSkb => "sk_skb",
        ProgramType::CgroupDevice => "cgroup_device",
        ProgramType::SkMsg => "sk_msg",
        ProgramType::RawTracePoint => "raw_tracepoint",
        ProgramType::CgroupSockAddr => "cgroup_sock_addr",
        ProgramType::LwtSeg6local => "lwt_seg6local",
        ProgramType::LircMode2 => "lirc_mode2",
        ProgramType::SkReuseport => "sk_reuseport",
        ProgramType::FlowDissector => "flow_dissector",
        ProgramType::CgroupSysctl => "cgroup_sysctl",
        ProgramType::RawTracePointWritable => "raw_tracepoint_writable",
        ProgramType::CgroupSockopt => "cgroup_sockopt",
        ProgramType::Tracing => "tracing",
        ProgramType::StructOps => "struct_ops",
        ProgramType::Extension => "ext",
        ProgramType::Lsm => "lsm",
        ProgramType::SkLookup => "sk_lookup",
        ProgramType::Syscall => "syscall",
        ProgramType::Netfilter => "netfilter",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpftool_type_names() {
        assert_eq!(program_type_name(ProgramType::Xdp), "xdp");
        assert_eq!(program_type_name(ProgramType::SchedClassifier), "sched_cls");
        assert_eq!(program_type_name(ProgramType::Extension), "ext");
        assert_eq!(program_type_name(ProgramType::LwtInput), "lwt_in");
        assert_eq!(
            program_type_name(ProgramType::RawTracePointWritable),
            "raw_tracepoint_writable"
        );
    }

    #[test]
    fn missing_pin_under_missing_bpffs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bpf");
        let programs = KernelPrograms::new(&root);
        match programs.get_by_pinned_path(&root.join("prog")) {
            Err(InspectError::BpffsNotMounted(r)) => assert_eq!(r, root.display().to_string()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_pin_under_mounted_bpffs() {
        let dir = tempfile::tempdir().unwrap();
        let programs = KernelPrograms::new(dir.path());
        let path = dir.path().join("prog");
        match programs.get_by_pinned_path(&path) {
            Err(InspectError::NotFound(what)) => assert!(what.contains("prog")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    #[ignore = "needs CAP_BPF"]
    fn lists_loaded_programs() {
        let programs = KernelPrograms::new(crate::error::DEFAULT_BPFFS);
        for p in programs.list().unwrap() {
            assert_eq!(p.tag.len(), 16);
            assert_eq!(programs.get_by_id(p.id).unwrap().id, p.id);
        }
    }
}
