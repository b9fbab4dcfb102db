//! `fixture run`: loads the counter program, attaches it, pushes packets
//! through it and checks the count, printing PASS/FAIL for each step.

use std::fmt::{self, Display};
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::config::FixtureConfig;
use crate::harness::{self, Fixture, PrivateNetns};

#[derive(Debug, Default, Args)]
pub struct FixtureArgs {
    /// Compiled eBPF object to load
    #[arg(long, value_name = "PATH")]
    pub object: Option<PathBuf>,

    /// Interface to attach to
    #[arg(long, value_name = "IFACE")]
    pub iface: Option<String>,

    /// Number of UDP packets to send
    #[arg(long, value_name = "N")]
    pub packets: Option<u32>,

    /// Concurrent senders (1 sends sequentially)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// UDP port of the local receiver (0 picks a free one)
    #[arg(long)]
    pub port: Option<u16>,

    /// Pin the program under this bpffs directory
    #[arg(long, value_name = "DIR")]
    pub pin: Option<PathBuf>,

    /// Attach in driver mode instead of generic (SKB) mode
    #[arg(long)]
    pub drv: bool,

    /// Run in a private network namespace so only fixture traffic reaches `lo`
    #[arg(long)]
    pub netns: bool,
}

/// Effective settings after applying CLI overrides to the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureOptions {
    pub object: PathBuf,
    pub interface: String,
    pub packets: u32,
    pub concurrency: usize,
    pub port: u16,
    pub pin: Option<PathBuf>,
    pub skb_mode: bool,
    pub private_netns: bool,
}

impl FixtureArgs {
    pub fn options(&self, config: &FixtureConfig) -> FixtureOptions {
        FixtureOptions {
            object: self.object.clone().unwrap_or_else(|| config.object.clone()),
            interface: self.iface.clone().unwrap_or_else(|| config.interface.clone()),
            packets: self.packets.unwrap_or(config.packets),
            concurrency: self.concurrency.unwrap_or(config.concurrency).max(1),
            port: self.port.unwrap_or(config.port),
            pin: self.pin.clone(),
            skb_mode: config.skb_mode && !self.drv,
            private_netns: self.netns,
        }
    }
}

/// Step-by-step PASS/FAIL report.
pub struct Report<W: Write> {
    out: W,
    step: u32,
    pub pass: u32,
    pub fail: u32,
    /// First failed write; the report keeps counting so the summary is right.
    write_error: Option<io::Error>,
}

impl<W: Write> Report<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            step: 0,
            pass: 0,
            fail: 0,
            write_error: None,
        }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_fmt(args).and_then(|()| self.out.write_all(b"\n")) {
            self.write_error = Some(e);
        }
    }

    fn step(&mut self, desc: &str) {
        self.step += 1;
        let step = self.step;
        self.line(format_args!("[Step {step:>2}] {desc}"));
    }

    fn note(&mut self, msg: impl Display) {
        self.line(format_args!("  {msg}"));
    }

    /// Records the outcome and hands back the value on success.
    fn check<T, M: Display>(&mut self, result: Result<T>, msg: impl FnOnce(&T) -> M) -> Option<T> {
        match result {
            Ok(value) => {
                self.line(format_args!("  ✓ PASS: {}\n", msg(&value)));
                self.pass += 1;
                Some(value)
            }
            Err(e) => {
                self.line(format_args!("  ✗ FAIL: {e:#}\n"));
                self.fail += 1;
                None
            }
        }
    }

    fn skip(&mut self, why: &str) {
        self.line(format_args!("  - SKIP: {why}\n"));
    }

    fn summary(&mut self) -> Result<()> {
        let (pass, fail) = (self.pass, self.fail);
        self.line(format_args!(
            "=== Summary: {pass}/{} passed, {fail} failed ===",
            pass + fail
        ));
        if let Err(e) = self.out.flush() {
            self.write_error.get_or_insert(e);
        }
        if let Some(e) = self.write_error.take() {
            return Err(e).context("writing fixture report");
        }
        if fail > 0 {
            bail!("{fail} fixture step(s) failed");
        }
        Ok(())
    }
}

fn expect_eq(what: &str, got: u64, want: u64) -> Result<u64> {
    if got != want {
        bail!("{what}: expected {want}, got {got}");
    }
    Ok(got)
}

fn enter_netns(interface: &str) -> Result<PrivateNetns> {
    if interface != "lo" {
        bail!("a private namespace only has lo, not {interface}");
    }
    PrivateNetns::enter()
}

pub fn run(opts: &FixtureOptions, out: impl Write) -> Result<()> {
    let mut report = Report::new(out);
    // A failed step ends the run early; the summary still reports it.
    let _ = run_steps(opts, &mut report);
    report.summary()
}

fn run_steps<W: Write>(opts: &FixtureOptions, report: &mut Report<W>) -> Option<()> {
    if !nix::unistd::geteuid().is_root() {
        log::warn!("not running as root; loading and attaching will likely fail");
    }

    // Declared before the fixture so the program is detached inside the
    // namespace it was attached in.
    let _netns = if opts.private_netns {
        report.step("Enter private network namespace");
        Some(report.check(enter_netns(&opts.interface), |_| "isolated lo is up")?)
    } else {
        None
    };

    report.step("Validate eBPF ELF object");
    report.check(harness::validate_elf(&opts.object), |size| {
        format!("valid ELF, {size} bytes")
    })?;

    report.step("Load eBPF object");
    let mut fixture = report.check(Fixture::open(&opts.object), |_| "loaded")?;
    let (programs, maps) = fixture.contents();
    report.note(format_args!("programs: {}", programs.join(", ")));
    report.note(format_args!("maps: {}", maps.join(", ")));

    report.step("Load test_prog through the verifier");
    report.check(fixture.load_program(), |_| "XDP program verified")?;

    report.step("Check program license");
    report.check(fixture.check_license(), |license| {
        format!("{license}-compatible, GPL-only helpers allowed")
    })?;

    report.step("Pin test_prog");
    match &opts.pin {
        Some(dir) => {
            report.check(fixture.pin_program(dir), |path| {
                format!("pinned at {}", path.display())
            })?;
        }
        None => report.skip("no --pin directory given"),
    }

    let mode = if opts.skb_mode { "skb" } else { "driver" };
    report.step(&format!("Attach to {} ({mode} mode)", opts.interface));
    report.check(fixture.attach(&opts.interface, opts.skb_mode), |_| "attached")?;
    if !opts.private_netns {
        report.note(format_args!(
            "other traffic on {} is counted too; use --netns for an exact count",
            opts.interface
        ));
    }

    report.step("Read initial counter");
    let before = report.check(fixture.counter(), |c| format!("test_map[0] = {c}"))?;

    report.step(&format!(
        "Send {} packets ({} sender(s))",
        opts.packets, opts.concurrency
    ));
    let received = report.check(
        harness::send_packets_blocking(opts.packets, opts.concurrency, opts.port),
        |n| format!("{n} packets received"),
    )?;

    report.step("Counter advanced by the packet count");
    let after = fixture.counter();
    report.check(
        after.and_then(|after| {
            expect_eq("counter delta", after.saturating_sub(before), opts.packets.into())
        }),
        |delta| format!("counter advanced by {delta}"),
    );

    report.step("Every packet passed");
    report.check(
        expect_eq("packets received", received.into(), opts.packets.into()),
        |n| format!("all {n} packets delivered"),
    );

    Some(())
}
