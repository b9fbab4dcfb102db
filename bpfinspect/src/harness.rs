//! Loads the counter fixture, attaches it to an interface and drives UDP
//! traffic through it.

use std::fs::{self, File};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aya::maps::Array;
use aya::programs::{Xdp, XdpFlags};
use aya::Ebpf;
use bpfinspect_common::{COUNTER_KEY, COUNTER_MAP, COUNTER_PROGRAM, FIXTURE_LICENSE};
use nix::sched::{setns, unshare, CloneFlags};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;

/// How long the receiver waits for the next datagram before giving up.
const RECV_IDLE: Duration = Duration::from_secs(2);

const PAYLOAD: &[u8] = b"bpfinspect fixture";

/// Checks that `path` holds an ELF object and returns its size.
pub fn validate_elf(path: &Path) -> Result<usize> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let size = data.len();
    if size < 16 {
        bail!("eBPF object too small: {size} bytes");
    }
    // ELF magic: 0x7f 'E' 'L' 'F'
    if &data[0..4] != b"\x7fELF" {
        bail!(
            "not an ELF: magic={:02x} {:02x} {:02x} {:02x}",
            data[0],
            data[1],
            data[2],
            data[3]
        );
    }
    Ok(size)
}

/// A loaded counter fixture. Dropping it detaches and unloads everything.
pub struct Fixture {
    bpf: Ebpf,
}

impl Fixture {
    pub fn open(object: &Path) -> Result<Self> {
        let bpf = Ebpf::load_file(object)
            .with_context(|| format!("loading eBPF object {}", object.display()))?;
        Ok(Self { bpf })
    }

    /// Program and map names found in the object.
    pub fn contents(&self) -> (Vec<String>, Vec<String>) {
        let programs = self.bpf.programs().map(|(name, _)| name.to_string()).collect();
        let maps = self.bpf.maps().map(|(name, _)| name.to_string()).collect();
        (programs, maps)
    }

    fn program(&mut self) -> Result<&mut Xdp> {
        let program = self
            .bpf
            .program_mut(COUNTER_PROGRAM)
            .with_context(|| format!("program {COUNTER_PROGRAM} not found in object"))?;
        let xdp: &mut Xdp = program
            .try_into()
            .with_context(|| format!("{COUNTER_PROGRAM} is not an XDP program"))?;
        Ok(xdp)
    }

    /// Runs the program through the kernel verifier.
    pub fn load_program(&mut self) -> Result<()> {
        self.program()?
            .load()
            .with_context(|| format!("verifying {COUNTER_PROGRAM}"))
    }

    /// Confirms the kernel accepted the program under a GPL-compatible
    /// license. Kernels that do not report the bit are given the benefit of
    /// the doubt.
    pub fn check_license(&mut self) -> Result<&'static str> {
        let info = self
            .program()?
            .info()
            .with_context(|| format!("querying {COUNTER_PROGRAM} info"))?;
        if info.gpl_compatible() == Some(false) {
            bail!("{COUNTER_PROGRAM} is not GPL compatible; object license must be {FIXTURE_LICENSE}");
        }
        Ok(FIXTURE_LICENSE)
    }

    /// Pins the loaded program as `<dir>/test_prog`.
    pub fn pin_program(&mut self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(COUNTER_PROGRAM);
        self.program()?
            .pin(&path)
            .with_context(|| format!("pinning {COUNTER_PROGRAM} at {}", path.display()))?;
        Ok(path)
    }

    /// Attaches in generic (SKB) mode when `skb_mode` is set, otherwise in
    /// native driver mode. Driver mode fails on interfaces without XDP
    /// support instead of falling back to generic mode.
    pub fn attach(&mut self, interface: &str, skb_mode: bool) -> Result<()> {
        let flags = attach_flags(skb_mode);
        self.program()?
            .attach(interface, flags)
            .with_context(|| format!("attaching {COUNTER_PROGRAM} to {interface}"))?;
        Ok(())
    }

    /// Current value of `test_map[0]`.
    pub fn counter(&self) -> Result<u64> {
        let map = self
            .bpf
            .map(COUNTER_MAP)
            .with_context(|| format!("map {COUNTER_MAP} not found in object"))?;
        let counters = Array::<_, u64>::try_from(map)
            .with_context(|| format!("{COUNTER_MAP} is not a u64 array"))?;
        counters
            .get(&COUNTER_KEY, 0)
            .with_context(|| format!("reading {COUNTER_MAP}[{COUNTER_KEY}]"))
    }
}

fn attach_flags(skb_mode: bool) -> XdpFlags {
    if skb_mode {
        XdpFlags::SKB_MODE
    } else {
        XdpFlags::DRV_MODE
    }
}

/// Moves the calling thread into a fresh network namespace whose only
/// interface is a quiet `lo`, and moves it back on drop.
///
/// Threads spawned while the guard is alive inherit the namespace. Anything
/// attached inside it must be dropped before the guard.
#[derive(Debug)]
pub struct PrivateNetns {
    previous: File,
}

impl PrivateNetns {
    pub fn enter() -> Result<Self> {
        let previous = File::open("/proc/thread-self/ns/net")
            .context("opening current network namespace")?;
        unshare(CloneFlags::CLONE_NEWNET).context("creating network namespace")?;
        let guard = Self { previous };
        // A new namespace starts with `lo` down.
        set_link_up("lo").context("bringing lo up in the new namespace")?;
        Ok(guard)
    }
}

impl Drop for PrivateNetns {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.previous, CloneFlags::CLONE_NEWNET) {
            log::warn!("failed to return to the original network namespace: {e}");
        }
    }
}

fn set_link_up(name: &str) -> io::Result<()> {
    let mut req: libc::ifreq = unsafe { mem::zeroed() };
    if name.len() >= req.ifr_name.len() {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    for (dst, src) in req.ifr_name.iter_mut().zip(name.bytes()) {
        *dst = src as libc::c_char;
    }

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let sock = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS, &mut req as *mut libc::ifreq) } < 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe { req.ifr_ifru.ifru_flags |= libc::IFF_UP as libc::c_short };
    if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS, &req as *const libc::ifreq) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Bytes of socket receive buffer to ask for so bursts are not dropped
/// before the receiver drains them.
const RECV_BUFFER: libc::c_int = 4 << 20;

fn grow_recv_buffer(fd: RawFd) {
    let size = RECV_BUFFER;
    for opt in [libc::SO_RCVBUFFORCE, libc::SO_RCVBUF] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of_val(&size) as libc::socklen_t,
            )
        };
        if ret == 0 {
            return;
        }
    }
    log::debug!(
        "could not grow receive buffer: {}",
        std::io::Error::last_os_error()
    );
}

/// Sends `count` UDP datagrams to a local receiver on `port` (0 picks a free
/// port) using up to `concurrency` sending tasks. Returns how many arrived.
pub async fn send_packets(count: u32, concurrency: usize, port: u16) -> Result<u32> {
    let receiver = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .await
        .context("binding receiver socket")?;
    grow_recv_buffer(receiver.as_raw_fd());
    let target = receiver.local_addr().context("receiver address")?;

    let recv = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let mut received = 0u32;
        while received < count {
            match tokio::time::timeout(RECV_IDLE, receiver.recv_from(&mut buf)).await {
                Ok(Ok(_)) => received += 1,
                Ok(Err(e)) => {
                    log::debug!("receive failed: {e}");
                    break;
                }
                Err(_) => break,
            }
        }
        received
    });

    let workers = concurrency.clamp(1, count.max(1) as usize);
    let mut senders = JoinSet::new();
    for worker in 0..workers {
        // Spread the remainder over the first workers.
        let share = count / workers as u32 + u32::from((worker as u32) < count % workers as u32);
        senders.spawn(async move {
            let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .await
                .context("binding sender socket")?;
            for _ in 0..share {
                socket
                    .send_to(PAYLOAD, target)
                    .await
                    .with_context(|| format!("sending to {target}"))?;
            }
            anyhow::Ok(())
        });
    }
    while let Some(result) = senders.join_next().await {
        result.context("sender task panicked")??;
    }

    recv.await.context("receiver task panicked")
}

/// Blocking wrapper around [`send_packets`].
pub fn send_packets_blocking(count: u32, concurrency: usize, port: u16) -> Result<u32> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?
        .block_on(send_packets(count, concurrency, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> PathBuf {
        std::env::var_os("BPFINSPECT_FIXTURE_OBJECT")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                Path::new(env!("CARGO_MANIFEST_DIR"))
                    .join("..")
                    .join(crate::config::DEFAULT_OBJECT)
            })
    }

    #[test]
    fn rejects_non_elf_objects() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small");
        fs::write(&small, b"\x7fELF").unwrap();
        assert!(validate_elf(&small).unwrap_err().to_string().contains("too small"));

        let text = dir.path().join("text");
        fs::write(&text, [b'#'; 64]).unwrap();
        assert!(validate_elf(&text).unwrap_err().to_string().contains("not an ELF"));

        let elf = dir.path().join("elf");
        let mut bytes = b"\x7fELF".to_vec();
        bytes.resize(64, 0);
        fs::write(&elf, &bytes).unwrap();
        assert_eq!(validate_elf(&elf).unwrap(), 64);

        assert!(validate_elf(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn loopback_traffic_arrives() {
        assert_eq!(send_packets_blocking(0, 1, 0).unwrap(), 0);
        assert_eq!(send_packets_blocking(5, 1, 0).unwrap(), 5);
        assert_eq!(send_packets_blocking(50, 8, 0).unwrap(), 50);
    }

    #[test]
    fn driver_mode_is_never_generic() {
        assert_eq!(attach_flags(true), XdpFlags::SKB_MODE);
        assert_eq!(attach_flags(false), XdpFlags::DRV_MODE);
    }

    #[test]
    #[ignore = "needs CAP_SYS_ADMIN"]
    fn private_namespace_has_its_own_loopback() {
        let outside = fs::read_link("/proc/thread-self/ns/net").unwrap();
        {
            let _netns = PrivateNetns::enter().unwrap();
            assert_ne!(fs::read_link("/proc/thread-self/ns/net").unwrap(), outside);
            assert_eq!(send_packets_blocking(5, 2, 0).unwrap(), 5);
        }
        assert_eq!(fs::read_link("/proc/thread-self/ns/net").unwrap(), outside);
    }

    /// Runs inside a private namespace so no other loopback traffic reaches
    /// the counter.
    fn run(packets: u32, concurrency: usize) -> (u64, u64, u32) {
        let _netns = PrivateNetns::enter().unwrap();
        let mut fixture = Fixture::open(&object()).unwrap();
        fixture.load_program().unwrap();
        assert_eq!(fixture.check_license().unwrap(), "GPL");
        fixture.attach("lo", true).unwrap();
        let before = fixture.counter().unwrap();
        let received = send_packets_blocking(packets, concurrency, 0).unwrap();
        let after = fixture.counter().unwrap();
        (before, after, received)
    }

    #[test]
    #[ignore = "needs root and the built eBPF object"]
    fn no_packets_leave_counter_at_zero() {
        let (before, after, received) = run(0, 1);
        assert_eq!(before, 0);
        assert_eq!(after, 0);
        assert_eq!(received, 0);
    }

    #[test]
    #[ignore = "needs root and the built eBPF object"]
    fn five_sequential_packets() {
        let (before, after, received) = run(5, 1);
        assert_eq!(after - before, 5);
        assert_eq!(received, 5);
    }

    #[test]
    #[ignore = "needs root and the built eBPF object"]
    fn thousand_concurrent_packets() {
        let (before, after, received) = run(1000, 64);
        assert_eq!(after - before, 1000);
        assert_eq!(received, 1000);
    }
}
