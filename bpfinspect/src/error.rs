use std::error::Error as StdError;
use std::io;
use std::path::Path;

use aya::maps::MapError;
use aya::programs::ProgramError;
use thiserror::Error;

/// Default mount point of the BPF filesystem.
pub const DEFAULT_BPFFS: &str = "/sys/fs/bpf";

/// Errors surfaced by the inspection layer.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied: requires CAP_SYS_ADMIN or CAP_BPF")]
    Permission,

    #[error("BPF filesystem not mounted at {0}")]
    BpffsNotMounted(String),

    #[error("invalid ID: {0}")]
    InvalidId(String),

    #[error("invalid key format: {0}")]
    InvalidKey(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("key not found in map")]
    KeyNotFound,

    #[error("no more keys")]
    NoMoreKeys,

    #[error("map is empty")]
    MapEmpty,

    #[error("{call} failed")]
    Syscall {
        call: &'static str,
        #[source]
        io_error: io::Error,
    },

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Map(#[from] MapError),
}

impl InspectError {
    /// Normalizes kernel errors into the variants the CLI knows how to explain.
    ///
    /// `what` names the object being accessed and is used for `NotFound`.
    pub fn classify(self, what: impl Into<String>) -> Self {
        match self {
            Self::Program(_) | Self::Map(_) | Self::Syscall { .. } => {
                if is_permission_error(&self) {
                    Self::Permission
                } else if is_not_found_error(&self) {
                    Self::NotFound(what.into())
                } else {
                    self
                }
            }
            other => other,
        }
    }

    /// User-facing rendering, including remediation hints where we have them.
    pub fn describe(&self) -> String {
        match self {
            Self::Permission => permission_help(),
            Self::BpffsNotMounted(root) => bpffs_help(root),
            other => format!("Error: {other}"),
        }
    }
}

fn io_errors<'a>(err: &'a (dyn StdError + 'static)) -> impl Iterator<Item = &'a io::Error> + 'a {
    let mut next = Some(err);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.source();
        Some(current)
    })
    .filter_map(|e| e.downcast_ref::<io::Error>())
}

fn errno_in_chain(err: &(dyn StdError + 'static), codes: &[i32]) -> bool {
    io_errors(err).any(|e| e.raw_os_error().is_some_and(|code| codes.contains(&code)))
}

fn message_contains(err: &(dyn StdError + 'static), needles: &[&str]) -> bool {
    let mut next = Some(err);
    while let Some(current) = next {
        let msg = current.to_string().to_lowercase();
        if needles.iter().any(|n| msg.contains(n)) {
            return true;
        }
        next = current.source();
    }
    false
}

/// True for EPERM/EACCES anywhere in the source chain.
pub fn is_permission_error(err: &(dyn StdError + 'static)) -> bool {
    if matches!(err.downcast_ref::<InspectError>(), Some(InspectError::Permission)) {
        return true;
    }
    errno_in_chain(err, &[libc::EPERM, libc::EACCES])
        || io_errors(err).any(|e| e.kind() == io::ErrorKind::PermissionDenied)
        || message_contains(err, &["permission denied", "operation not permitted"])
}

/// True for ENOENT anywhere in the source chain.
pub fn is_not_found_error(err: &(dyn StdError + 'static)) -> bool {
    if matches!(
        err.downcast_ref::<InspectError>(),
        Some(InspectError::NotFound(_) | InspectError::KeyNotFound)
    ) {
        return true;
    }
    errno_in_chain(err, &[libc::ENOENT])
        || io_errors(err).any(|e| e.kind() == io::ErrorKind::NotFound)
        || message_contains(err, &["not found", "no such file or directory"])
}

pub fn bpffs_mounted(root: &Path) -> bool {
    root.exists()
}

pub fn permission_help() -> String {
    "Error: Permission denied.

This operation requires elevated privileges. You need one of the following:
  - Run as root (sudo bpfinspect ...)
  - Have CAP_SYS_ADMIN capability
  - Have CAP_BPF capability (Linux 5.8+)

To grant CAP_BPF capability to the binary:
  sudo setcap cap_bpf=ep /path/to/bpfinspect"
        .to_string()
}

pub fn bpffs_help(root: &str) -> String {
    format!(
        "Error: BPF filesystem not mounted at {root}.

To mount the BPF filesystem, run:
  sudo mount -t bpf bpf {root}

To mount it permanently, add to /etc/fstab:
  bpf {root} bpf defaults 0 0"
    )
}

/// Process exit status for a command result.
pub fn exit_code<T, E>(result: &Result<T, E>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syscall(code: i32) -> InspectError {
        InspectError::Syscall {
            call: "BPF_MAP_LOOKUP_ELEM",
            io_error: io::Error::from_raw_os_error(code),
        }
    }

    #[test]
    fn eperm_and_eacces_are_permission_errors() {
        assert!(is_permission_error(&syscall(libc::EPERM)));
        assert!(is_permission_error(&syscall(libc::EACCES)));
        assert!(!is_permission_error(&syscall(libc::EINVAL)));
        assert!(is_permission_error(&InspectError::Permission));
    }

    #[test]
    fn enoent_is_not_found() {
        assert!(is_not_found_error(&syscall(libc::ENOENT)));
        assert!(is_not_found_error(&InspectError::KeyNotFound));
        assert!(is_not_found_error(&InspectError::NotFound("map 3".into())));
        assert!(!is_not_found_error(&syscall(libc::E2BIG)));
    }

    #[test]
    fn permission_detected_through_anyhow_context() {
        let err = anyhow::Error::new(syscall(libc::EPERM)).context("listing programs");
        assert!(is_permission_error(err.as_ref()));
    }

    #[test]
    fn classify_rewrites_kernel_errors() {
        assert!(matches!(
            syscall(libc::EPERM).classify("program 1"),
            InspectError::Permission
        ));
        match syscall(libc::ENOENT).classify("program 7") {
            InspectError::NotFound(what) => assert_eq!(what, "program 7"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            syscall(libc::EINVAL).classify("x"),
            InspectError::Syscall { .. }
        ));
        // Non-kernel variants pass through untouched.
        assert!(matches!(
            InspectError::MapEmpty.classify("x"),
            InspectError::MapEmpty
        ));
    }

    #[test]
    fn describe_adds_guidance() {
        assert!(InspectError::Permission.describe().contains("CAP_BPF"));
        let bpffs = InspectError::BpffsNotMounted(DEFAULT_BPFFS.into()).describe();
        assert!(bpffs.contains("mount -t bpf bpf /sys/fs/bpf"));
        assert_eq!(InspectError::NoMoreKeys.describe(), "Error: no more keys");
        assert_eq!(
            InspectError::KeyNotFound.describe(),
            "Error: key not found in map"
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code::<(), ()>(&Ok(())), 0);
        assert_eq!(exit_code::<(), _>(&Err(InspectError::MapEmpty)), 1);
    }
}
