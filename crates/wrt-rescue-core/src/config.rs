use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RescueError, Result};
use crate::types::InterfaceAddress;

/// RFC 2348 block size bounds
pub const MIN_BLOCK_SIZE: usize = 8;
pub const MAX_BLOCK_SIZE: usize = 65464;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RescueConfig {
    pub network: NetworkConfig,
    pub firmware: FirmwareLimits,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
    pub uboot: UbootConfig,
}

/// Host-side addressing for the recovery subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address assigned to the chosen host interface
    pub host_addr: InterfaceAddress,
    /// Fixed address the bootloader listens on in recovery mode
    pub target_addr: Ipv4Addr,
    /// Root of the sysfs mount used for interface enumeration
    pub sysfs_root: PathBuf,
    /// USB-Ethernet drivers loaded before enumeration (best effort)
    pub usb_drivers: Vec<String>,
    pub settle_secs: u64,
    pub link_timeout_secs: u64,
    /// Services stopped while the interface is borrowed and restarted afterwards
    pub managed_services: Vec<String>,
    /// ARP-probe the target after configuration (informational only)
    pub probe_target: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_addr: InterfaceAddress::new(Ipv4Addr::new(192, 168, 1, 2), 24),
            target_addr: Ipv4Addr::new(192, 168, 1, 1),
            sysfs_root: PathBuf::from("/sys"),
            usb_drivers: ["r8152", "ax88179_178a", "asix", "cdc_ether", "cdc_ncm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            settle_secs: 3,
            link_timeout_secs: 10,
            managed_services: vec!["NetworkManager".to_string()],
            probe_target: true,
        }
    }
}

impl NetworkConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.link_timeout_secs)
    }
}

/// Plausibility band for images of this device family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareLimits {
    /// Exclusive lower size bound
    pub min_size_bytes: u64,
    /// Exclusive upper size bound
    pub max_size_bytes: u64,
    /// Leading bytes examined for signatures and text detection
    pub sniff_window: usize,
}

impl Default for FirmwareLimits {
    fn default() -> Self {
        Self {
            min_size_bytes: MIB,
            max_size_bytes: 64 * MIB,
            sniff_window: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferBackend {
    /// Spawn an external TFTP client per attempt
    External,
    /// Built-in TFTP client
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub backend: TransferBackend,
    /// External client executable
    pub program: String,
    /// External client arguments. Placeholders: {file} {remote} {target}
    /// {port} {blksize} {timeout}
    pub args: Vec<String>,
    /// File name announced to the bootloader
    pub remote_name: String,
    pub port: u16,
    pub block_size: usize,
    /// Per-packet retransmission timeout negotiated with the target
    pub block_timeout_secs: u64,
    /// Images at or above this size get the larger attempt budget
    pub large_threshold_bytes: u64,
    pub attempts_small: u32,
    pub attempts_large: u32,
    /// Ask the operator after this many consecutive failures
    pub prompt_every: u32,
    pub backoff_secs: u64,
    /// Wall-clock cap on a single attempt
    pub attempt_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            backend: TransferBackend::External,
            program: "atftp".to_string(),
            args: [
                "--option",
                "blksize {blksize}",
                "--option",
                "timeout {timeout}",
                "--put",
                "--local-file",
                "{file}",
                "--remote-file",
                "{remote}",
                "{target}",
                "{port}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            remote_name: "recovery.bin".to_string(),
            port: 69,
            block_size: 1468,
            block_timeout_secs: 5,
            large_threshold_bytes: 8 * MIB,
            attempts_small: 10,
            attempts_large: 20,
            prompt_every: 5,
            backoff_secs: 3,
            attempt_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Emit structured JSON audit events for each step of a run
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            audit_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Parameters for the printed U-Boot console sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UbootConfig {
    /// RAM address the image is loaded to
    pub load_addr: String,
    /// Flash offset to write to; no flash step is printed when unset
    pub flash_addr: Option<String>,
    /// Size of the flash region erased before writing
    pub flash_size: Option<String>,
}

impl Default for UbootConfig {
    fn default() -> Self {
        Self {
            load_addr: "0x80060000".to_string(),
            flash_addr: None,
            flash_size: None,
        }
    }
}

pub fn validate_config(config: &RescueConfig) -> Result<()> {
    validate_network(&config.network)?;
    validate_firmware_limits(&config.firmware)?;
    validate_transfer(&config.transfer)?;

    if let Some(ref log_file) = config.logging.file {
        let parent = log_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| invalid("logging.file must include a parent directory"))?;
        match std::fs::metadata(parent) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(invalid("logging.file parent must be a directory")),
            Err(e) => return Err(invalid(format!("logging.file parent error: {e}"))),
        }
    }

    if config.uboot.load_addr.trim().is_empty() {
        return Err(invalid("uboot.load_addr must not be empty"));
    }

    Ok(())
}

pub fn validate_network(config: &NetworkConfig) -> Result<()> {
    let host = config.host_addr;

    if !(8..=30).contains(&host.prefix_len) {
        return Err(invalid(format!(
            "network.host_addr prefix /{} must be in range /8-/30",
            host.prefix_len
        )));
    }

    if host.addr == config.target_addr {
        return Err(invalid(
            "network.host_addr must differ from network.target_addr",
        ));
    }

    if !host.contains(config.target_addr) {
        return Err(invalid(format!(
            "network.target_addr {} is not on the host subnet {}/{}",
            config.target_addr,
            host.network(),
            host.prefix_len
        )));
    }

    Ok(())
}

pub fn validate_firmware_limits(limits: &FirmwareLimits) -> Result<()> {
    if limits.min_size_bytes >= limits.max_size_bytes {
        return Err(invalid(
            "firmware.min_size_bytes must be below firmware.max_size_bytes",
        ));
    }
    if limits.sniff_window == 0 {
        return Err(invalid("firmware.sniff_window must be non-zero"));
    }
    Ok(())
}

pub fn validate_transfer(config: &TransferConfig) -> Result<()> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&config.block_size) {
        return Err(invalid(format!(
            "transfer.block_size must be in range {MIN_BLOCK_SIZE}-{MAX_BLOCK_SIZE}"
        )));
    }
    if config.attempts_small == 0 || config.attempts_large == 0 {
        return Err(invalid("transfer attempt budgets must be non-zero"));
    }
    if config.attempts_large < config.attempts_small {
        return Err(invalid(
            "transfer.attempts_large must not be below transfer.attempts_small",
        ));
    }
    if config.prompt_every == 0 {
        return Err(invalid("transfer.prompt_every must be non-zero"));
    }
    if config.attempt_timeout_secs == 0 {
        return Err(invalid("transfer.attempt_timeout_secs must be non-zero"));
    }
    if config.port == 0 {
        return Err(invalid("transfer.port must be non-zero"));
    }
    if config.remote_name.trim().is_empty() {
        return Err(invalid("transfer.remote_name must not be empty"));
    }
    if config.backend == TransferBackend::External && config.program.trim().is_empty() {
        return Err(invalid(
            "transfer.program must be set for the external backend",
        ));
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> RescueError {
    RescueError::InvalidConfig(msg.into())
}
