use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DEFAULT_BPFFS;
use crate::output::Format;

/// Where `cargo xtask build-ebpf` leaves the fixture object, relative to the
/// workspace root.
pub const DEFAULT_OBJECT: &str = "bpfinspect-ebpf/target/bpfel-unknown-none/release/bpfinspect-ebpf";

/// Application configuration loaded from ~/.config/bpfinspect/config.toml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub fixture: FixtureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output format: "plain", "json" or "pretty".
    #[serde(default)]
    pub format: Format,
    /// Mount point of the BPF filesystem.
    #[serde(default = "default_bpffs_root")]
    pub bpffs_root: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            bpffs_root: default_bpffs_root(),
        }
    }
}

fn default_bpffs_root() -> PathBuf {
    PathBuf::from(DEFAULT_BPFFS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureConfig {
    /// Compiled eBPF object holding `test_prog` and `test_map`.
    #[serde(default = "default_object")]
    pub object: PathBuf,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_packets")]
    pub packets: u32,
    /// Number of concurrent senders; 1 sends sequentially.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// UDP port of the local receiver; 0 picks a free one.
    #[serde(default)]
    pub port: u16,
    /// Attach in generic (SKB) mode rather than driver mode.
    #[serde(default = "default_skb_mode")]
    pub skb_mode: bool,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            object: default_object(),
            interface: default_interface(),
            packets: default_packets(),
            concurrency: default_concurrency(),
            port: 0,
            skb_mode: default_skb_mode(),
        }
    }
}

fn default_object() -> PathBuf {
    PathBuf::from(DEFAULT_OBJECT)
}

fn default_interface() -> String {
    "lo".to_string()
}

fn default_packets() -> u32 {
    5
}

fn default_concurrency() -> usize {
    1
}

fn default_skb_mode() -> bool {
    true
}

impl Config {
    /// Load config from the default path, or return defaults if not found.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config from {}", path.display()))
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("bpfinspect")
        .join("config.toml")
}
