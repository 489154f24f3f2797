//! Read-only device information exposed to external collaborators.
//!
//! The desktop UI and the info endpoint consume this model as-is; it plays
//! no part in the relay's state machines.

use serde::Serialize;

/// Basic identity of the host machine running the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Build counter, bumped by release tooling.
    pub build: String,
    /// Stable identifier; the host name doubles as the id.
    pub id: String,
    /// Human-readable machine name.
    pub name: String,
    /// Operating system tag (`"linux"`, `"windows"`, `"macos"`, ...).
    pub platform: String,
    /// Relay version string.
    pub version: String,
}

impl DeviceInfo {
    /// Collects device info from the environment.
    ///
    /// Never fails: when the host name cannot be determined the name and id
    /// fall back to `"unknown"`.
    pub fn collect() -> Self {
        let name = host_name().unwrap_or_else(|| "unknown".to_string());
        Self {
            build: "1".to_string(),
            id: name.clone(),
            name,
            platform: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Reads the machine name from the environment (`HOSTNAME` on Unix shells,
/// `COMPUTERNAME` on Windows).
fn host_name() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .filter(|name| !name.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
