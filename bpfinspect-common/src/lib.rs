#![cfg_attr(not(feature = "userspace"), no_std)]

/// Name of the counter map in the fixture object.
pub const COUNTER_MAP: &str = "test_map";

/// Name of the XDP program in the fixture object.
pub const COUNTER_PROGRAM: &str = "test_prog";

/// The only valid key of the counter map.
pub const COUNTER_KEY: u32 = 0;

/// Number of slots in the counter map (`max_entries`).
pub const COUNTER_SLOTS: u32 = 1;

/// License the fixture object declares; the kernel only grants GPL-only
/// helpers to programs with a GPL-compatible license.
pub const FIXTURE_LICENSE: &str = "GPL";

/// XDP program return codes (`enum xdp_action`).
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "userspace", derive(Debug))]
pub enum XdpVerdict {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
}
