use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{GuardError, Result};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
const MAX_INTERFACE_LEN: usize = 15;

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub attach: AttachConfig,
    pub reporting: ReportingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Network interface to attach to (e.g. eth0)
    pub interface: String,
    /// Which hook runs the classifier
    pub hook: Hook,
    /// XDP attach mode, used when hook = "xdp"
    pub xdp_mode: XdpMode,
    /// Traffic direction, used when hook = "tc"
    pub tc_direction: TcDirection,
    /// Compiled eBPF object
    pub program: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Seconds between counter reports while attached (0 = only on exit)
    pub interval_secs: u64,
    /// Emit reports as JSON instead of a table
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive; RUST_LOG takes precedence when set
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Xdp,
    Tc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum XdpMode {
    /// Generic mode, works on any driver
    Skb,
    /// Native driver mode
    Driver,
    /// NIC offload
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TcDirection {
    Ingress,
    Egress,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            attach: AttachConfig {
                interface: "eth0".to_string(),
                hook: Hook::Xdp,
                xdp_mode: XdpMode::Skb,
                tc_direction: TcDirection::Egress,
                program: PathBuf::from(
                    "ebpf/metadata-blocker/target/bpfel-unknown-none/release/metadata-blocker",
                ),
            },
            reporting: ReportingConfig {
                interval_secs: 10,
                json: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl GuardConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| GuardError::InvalidConfig(e.to_string()))
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GuardError::InvalidConfig(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let iface = &self.attach.interface;
        if iface.is_empty()
            || iface.len() > MAX_INTERFACE_LEN
            || iface.contains('/')
            || iface.chars().any(char::is_whitespace)
        {
            return Err(GuardError::InvalidInterface(iface.clone()));
        }

        if self.attach.program.as_os_str().is_empty() {
            return Err(GuardError::InvalidConfig(
                "attach.program must not be empty".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(GuardError::InvalidConfig(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
