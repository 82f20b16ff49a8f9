//! Veil Node -- library crate for the path control plane daemon.
//!
//! Exposes the daemon, its config, the host embedding surface and the
//! loopback simulator so integration tests and main.rs share one code path.

pub mod config;
pub mod daemon;
pub mod embed;
pub mod handle;
pub mod logging;
pub mod simulate;

use std::path::PathBuf;

pub use config::NodeConfig;
pub use daemon::{Daemon, DaemonError};
pub use embed::{Host, HostError};
pub use handle::{Handle, HandleTable};

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Parse a u64 written in decimal or as `0x`-prefixed hex.
pub fn parse_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
