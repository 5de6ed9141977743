use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Known firmware packaging formats, recognized by a short magic token near
/// the start of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    /// Legacy U-Boot image header
    UImage,
    /// Flattened image tree (device tree blob container)
    Fit,
    /// Broadcom TRX container
    Trx,
    /// UBI erase-counter header
    Ubi,
    /// Little-endian squashfs superblock
    Squashfs,
    /// OpenWrt sysupgrade tarball
    Tar,
}

impl Signature {
    pub const ALL: [Signature; 6] = [
        Signature::UImage,
        Signature::Fit,
        Signature::Trx,
        Signature::Ubi,
        Signature::Squashfs,
        Signature::Tar,
    ];

    pub fn magic(&self) -> &'static [u8] {
        match self {
            Signature::UImage => &[0x27, 0x05, 0x19, 0x56],
            Signature::Fit => &[0xd0, 0x0d, 0xfe, 0xed],
            Signature::Trx => b"HDR0",
            Signature::Ubi => b"UBI#",
            Signature::Squashfs => b"hsqs",
            Signature::Tar => b"ustar",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Signature::UImage => "U-Boot uImage",
            Signature::Fit => "FIT image",
            Signature::Trx => "TRX",
            Signature::Ubi => "UBI",
            Signature::Squashfs => "squashfs",
            Signature::Tar => "sysupgrade tar",
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Firmware image under consideration for a recovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub looks_binary: bool,
    pub signature: Option<Signature>,
}

/// IPv4 address with prefix length, as shown by `ip addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceAddress {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    pub fn netmask(&self) -> Ipv4Addr {
        let bits = match self.prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n.min(32))),
        };
        Ipv4Addr::from(bits)
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & u32::from(self.netmask()))
    }

    /// Whether `other` lies on this address's subnet
    pub fn contains(&self, other: Ipv4Addr) -> bool {
        u32::from(other) & u32::from(self.netmask()) == u32::from(self.network())
    }
}

impl std::fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl std::str::FromStr for InterfaceAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Missing prefix length in {s:?}"))?;

        let addr: Ipv4Addr = addr.parse()?;
        let prefix_len: u8 = prefix.parse()?;
        if prefix_len > 32 {
            anyhow::bail!("Prefix length {prefix_len} out of range");
        }

        Ok(InterfaceAddress { addr, prefix_len })
    }
}

impl TryFrom<String> for InterfaceAddress {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InterfaceAddress> for String {
    fn from(value: InterfaceAddress) -> Self {
        value.to_string()
    }
}

/// Operational state of a link, from the kernel's `operstate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Up,
    Down,
    Unknown,
}

impl LinkState {
    pub fn from_operstate(s: &str) -> Self {
        match s.trim() {
            "up" => LinkState::Up,
            "down" | "lowerlayerdown" | "dormant" | "notpresent" => LinkState::Down,
            _ => LinkState::Unknown,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Up => f.write_str("UP"),
            LinkState::Down => f.write_str("DOWN"),
            LinkState::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceInfo {
    pub name: String,
    pub state: LinkState,
    pub is_usb: bool,
    /// IPv4 addresses present before this run touched the interface
    pub addresses: Vec<InterfaceAddress>,
}

impl NetworkInterfaceInfo {
    pub fn is_loopback(&self) -> bool {
        self.name == "lo"
    }

    /// Wired Ethernet by kernel naming convention
    pub fn looks_wired(&self) -> bool {
        ["eth", "en", "usb"]
            .iter()
            .any(|prefix| self.name.starts_with(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    Success,
    Timeout,
    Failed { code: Option<i32>, detail: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success)
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::Success => f.write_str("success"),
            TransferOutcome::Timeout => f.write_str("timeout"),
            TransferOutcome::Failed {
                code: Some(code),
                detail,
            } => write!(f, "failed (exit {code}): {detail}"),
            TransferOutcome::Failed { code: None, detail } => write!(f, "failed: {detail}"),
        }
    }
}

/// One pass of the transfer loop
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub sequence: u32,
    pub outcome: TransferOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}
