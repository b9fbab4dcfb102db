//! Byte-level map access through `bpf(2)`.
//!
//! aya's typed maps need the key and value types at compile time; the CLI
//! only knows sizes at runtime, so element access goes straight to the
//! syscall with caller-sized buffers.

use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

use crate::error::InspectError;

const BPF_MAP_LOOKUP_ELEM: libc::c_long = 1;
const BPF_MAP_GET_NEXT_KEY: libc::c_long = 4;

/// The `BPF_MAP_*_ELEM` member of `union bpf_attr`.
#[repr(C)]
#[derive(Default)]
struct MapElemAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    /// `value` for lookups, `next_key` for get-next-key.
    value: u64,
    flags: u64,
}

fn sys_bpf(cmd: libc::c_long, attr: &mut MapElemAttr) -> io::Result<()> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd,
            attr as *mut MapElemAttr,
            mem::size_of::<MapElemAttr>(),
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Copies the value under `key` into `value`. Returns `false` on ENOENT.
///
/// `key` must be `key_size` bytes and `value` large enough for the map's
/// value layout; the kernel reads and writes exactly those sizes.
pub(crate) fn map_lookup_elem(
    fd: BorrowedFd<'_>,
    key: &[u8],
    value: &mut [u8],
) -> Result<bool, InspectError> {
    let mut attr = MapElemAttr {
        map_fd: fd.as_raw_fd() as u32,
        key: key.as_ptr() as u64,
        value: value.as_mut_ptr() as u64,
        ..Default::default()
    };
    match sys_bpf(BPF_MAP_LOOKUP_ELEM, &mut attr) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(false),
        Err(io_error) => Err(InspectError::Syscall {
            call: "BPF_MAP_LOOKUP_ELEM",
            io_error,
        }),
    }
}

/// Writes the key after `key` (or the first key) into `next`. Returns
/// `false` once the map is exhausted.
pub(crate) fn map_get_next_key(
    fd: BorrowedFd<'_>,
    key: Option<&[u8]>,
    next: &mut [u8],
) -> Result<bool, InspectError> {
    let mut attr = MapElemAttr {
        map_fd: fd.as_raw_fd() as u32,
        key: key.map_or(0, |k| k.as_ptr() as u64),
        value: next.as_mut_ptr() as u64,
        ..Default::default()
    };
    match sys_bpf(BPF_MAP_GET_NEXT_KEY, &mut attr) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(false),
        Err(io_error) => Err(InspectError::Syscall {
            call: "BPF_MAP_GET_NEXT_KEY",
            io_error,
        }),
    }
}

/// Reads a numeric field such as `memlock` from `/proc/self/fdinfo/<fd>`.
pub(crate) fn fdinfo_field(fd: BorrowedFd<'_>, field: &str) -> Option<u32> {
    let content = fs::read_to_string(format!("/proc/self/fdinfo/{}", fd.as_raw_fd())).ok()?;
    parse_fdinfo_field(&content, field)
}

fn parse_fdinfo_field(content: &str, field: &str) -> Option<u32> {
    content.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        (name.trim() == field)
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}

/// Number of possible CPUs, which sizes per-CPU map values.
pub(crate) fn possible_cpus() -> io::Result<usize> {
    let content = fs::read_to_string("/sys/devices/system/cpu/possible")?;
    parse_cpu_ranges(&content).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected cpu list: {}", content.trim()),
        )
    })
}

/// Counts CPUs in a kernel cpu list such as `0-3,6,8-9`.
fn parse_cpu_ranges(list: &str) -> Option<usize> {
    let mut count = 0usize;
    for range in list.trim().split(',').filter(|r| !r.is_empty()) {
        let (start, end) = match range.split_once('-') {
            Some((s, e)) => (s.parse::<usize>().ok()?, e.parse::<usize>().ok()?),
            None => {
                let cpu = range.parse::<usize>().ok()?;
                (cpu, cpu)
            }
        };
        if end < start {
            return None;
        }
        count += end - start + 1;
    }
    (count > 0).then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_matches_kernel_layout() {
        assert_eq!(mem::size_of::<MapElemAttr>(), 32);
    }

    #[test]
    fn cpu_ranges() {
        assert_eq!(parse_cpu_ranges("0\n"), Some(1));
        assert_eq!(parse_cpu_ranges("0-7\n"), Some(8));
        assert_eq!(parse_cpu_ranges("0-3,6,8-9"), Some(7));
        assert_eq!(parse_cpu_ranges(""), None);
        assert_eq!(parse_cpu_ranges("3-1"), None);
        assert_eq!(parse_cpu_ranges("a-b"), None);
    }

    #[test]
    fn fdinfo_parsing() {
        let content = "pos:\t0\nflags:\t02000002\nmnt_id:\t15\nmap_type:\t2\nmemlock:\t4096\n";
        assert_eq!(parse_fdinfo_field(content, "memlock"), Some(4096));
        assert_eq!(parse_fdinfo_field(content, "map_type"), Some(2));
        assert_eq!(parse_fdinfo_field(content, "owner_prog_type"), None);
    }

    #[test]
    fn non_map_fd_is_a_syscall_error() {
        use std::os::fd::AsFd;

        let file = tempfile::tempfile().unwrap();
        let mut next = [0u8; 4];
        match map_get_next_key(file.as_fd(), None, &mut next) {
            Err(InspectError::Syscall { call, io_error }) => {
                assert_eq!(call, "BPF_MAP_GET_NEXT_KEY");
                // EINVAL/EBADF, or EPERM/ENOSYS where bpf(2) is locked down.
                assert!(io_error.raw_os_error().is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
