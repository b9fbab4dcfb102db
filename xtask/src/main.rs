use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;

const EBPF_TARGET: &str = "bpfel-unknown-none";

#[derive(Parser)]
enum Cli {
    /// Build the XDP counter fixture
    BuildEbpf {
        /// Set the endianness of the BPF target
        #[clap(default_value = EBPF_TARGET, long)]
        target: String,
        /// Build in release mode
        #[clap(long)]
        release: bool,
    },
    /// Build everything and run bpfinspect as root
    Run {
        /// Build in release mode
        #[clap(long)]
        release: bool,
        /// Arguments to pass to bpfinspect
        #[clap(last = true)]
        run_args: Vec<String>,
    },
    /// Build everything and run `bpfinspect fixture run` against the fresh object
    Fixture {
        /// Arguments to pass to `fixture run`, e.g. `--packets 1000 --concurrency 64`
        #[clap(last = true)]
        run_args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = workspace_root()?;

    match cli {
        Cli::BuildEbpf { target, release } => build_ebpf(&root, &target, release),
        Cli::Run { release, run_args } => {
            build_ebpf(&root, EBPF_TARGET, release)?;
            run(&root, release, &run_args)
        }
        Cli::Fixture { run_args } => {
            // The object is always the release build; debug eBPF rarely passes the verifier.
            build_ebpf(&root, EBPF_TARGET, true)?;
            let object = root
                .join("bpfinspect-ebpf")
                .join("target")
                .join(EBPF_TARGET)
                .join("release")
                .join("bpfinspect-ebpf");
            let mut args = vec![
                "fixture".to_string(),
                "run".to_string(),
                "--object".to_string(),
                object.display().to_string(),
            ];
            args.extend(run_args);
            run(&root, false, &args)
        }
    }
}

fn build_ebpf(root: &Path, target: &str, release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(root.join("bpfinspect-ebpf"))
        .env_remove("RUSTUP_TOOLCHAIN")
        .args([
            "+nightly",
            "build",
            "--target",
            target,
            "-Z",
            "build-std=core",
        ]);

    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("failed to build eBPF fixture")?;
    if !status.success() {
        bail!("eBPF build failed with status: {}", status);
    }

    Ok(())
}

fn run(root: &Path, release: bool, run_args: &[String]) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(root)
        .args(["build", "--package", "bpfinspect"]);

    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("failed to build bpfinspect")?;
    if !status.success() {
        bail!("userspace build failed with status: {}", status);
    }

    let profile = if release { "release" } else { "debug" };
    let bin = root.join("target").join(profile).join("bpfinspect");

    let mut cmd = Command::new("sudo");
    cmd.arg(bin);
    cmd.args(run_args);

    let status = cmd.status().context("failed to run bpfinspect")?;
    if !status.success() {
        bail!("bpfinspect exited with status: {}", status);
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version=1", "--no-deps"])
        .output()
        .context("failed to run cargo metadata")?;

    let metadata: serde_json::Value =
        serde_json::from_slice(&output.stdout).context("failed to parse cargo metadata")?;

    metadata["workspace_root"]
        .as_str()
        .map(PathBuf::from)
        .context("workspace_root not found in cargo metadata")
}
