#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{macros::map, macros::xdp, maps::Array, programs::XdpContext};
use bpfinspect_common::{XdpVerdict, COUNTER_KEY, COUNTER_SLOTS};

// The userspace harness finds this map by name, so the kernel-visible name
// must stay `test_map`.
#[map(name = "test_map")]
static TEST_MAP: Array<u64> = Array::with_max_entries(COUNTER_SLOTS, 0);

/// Counts every packet seen on the attached interface and lets it through.
#[xdp]
pub fn test_prog(_ctx: XdpContext) -> u32 {
    if let Some(counter) = TEST_MAP.get_ptr_mut(COUNTER_KEY) {
        // Lowers to a BPF atomic add, so concurrent CPUs never lose an increment.
        unsafe { AtomicU64::from_ptr(counter) }.fetch_add(1, Ordering::Relaxed);
    }
    XdpVerdict::Pass as u32
}

#[no_mangle]
#[link_section = "license"]
pub static LICENSE: [u8; 4] = *b"GPL\0";

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
