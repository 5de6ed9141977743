//! Plausibility checks for a firmware image before anything touches the
//! network.
//!
//! Each failed check is a [`Finding`]. The operator may waive findings one at
//! a time; the first one declined rejects the image.

use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::FirmwareLimits;
use crate::error::{RescueError, Result};
use crate::operator::{Notice, Operator};
use crate::types::{FirmwareCandidate, Signature};

/// Share of non-printable bytes above which a NUL-free sample still counts as binary
const BINARY_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    SizeOutOfRange { size: u64, min: u64, max: u64 },
    LooksLikeText,
    NoSignature,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::SizeOutOfRange { size, min, max } => write!(
                f,
                "size {} is outside the expected range ({} - {})",
                human_size(*size),
                human_size(*min),
                human_size(*max)
            ),
            Finding::LooksLikeText => f.write_str("file looks like plain text, not a binary image"),
            Finding::NoSignature => {
                f.write_str("no known firmware signature in the leading bytes")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(FirmwareCandidate),
    /// Every finding was waived by the operator
    Overridden {
        candidate: FirmwareCandidate,
        waived: Vec<Finding>,
    },
    Rejected(Finding),
}

impl Verdict {
    /// Turn a rejection into [`RescueError::FirmwareInvalid`]
    pub fn into_candidate(self) -> Result<FirmwareCandidate> {
        match self {
            Verdict::Accepted(candidate) | Verdict::Overridden { candidate, .. } => Ok(candidate),
            Verdict::Rejected(finding) => Err(RescueError::FirmwareInvalid(finding.to_string())),
        }
    }
}

/// Read size and leading bytes of `path`.
///
/// Anything that is not a readable regular file fails here, before any
/// operator interaction.
pub fn inspect(path: &Path, sniff_window: usize) -> Result<FirmwareCandidate> {
    let meta = std::fs::metadata(path).map_err(|e| {
        RescueError::FirmwareInvalid(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(RescueError::FirmwareInvalid(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let mut sample = Vec::with_capacity(sniff_window);
    std::fs::File::open(path)
        .and_then(|file| file.take(sniff_window as u64).read_to_end(&mut sample))
        .map_err(|e| {
            RescueError::FirmwareInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;

    let signature = find_signature(&sample).map(|(sig, offset)| {
        debug!("Found {} signature at offset {:#x}", sig, offset);
        sig
    });

    Ok(FirmwareCandidate {
        path: path.to_path_buf(),
        size: meta.len(),
        looks_binary: looks_binary(&sample),
        signature,
    })
}

/// Earliest signature token in `sample` and its offset
pub fn find_signature(sample: &[u8]) -> Option<(Signature, usize)> {
    Signature::ALL
        .iter()
        .filter_map(|sig| {
            let magic = sig.magic();
            sample
                .windows(magic.len())
                .position(|window| window == magic)
                .map(|offset| (*sig, offset))
        })
        .min_by_key(|(_, offset)| *offset)
}

/// NUL bytes or a high share of non-printable bytes mean binary.
/// An empty sample is not binary.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let unprintable = sample
        .iter()
        .filter(|&&b| !(b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n')))
        .count();
    unprintable as f64 / sample.len() as f64 > BINARY_THRESHOLD
}

/// Failed checks for `candidate`, in the order they are put to the operator
pub fn findings(candidate: &FirmwareCandidate, limits: &FirmwareLimits) -> Vec<Finding> {
    let mut found = Vec::new();

    if candidate.size <= limits.min_size_bytes || candidate.size >= limits.max_size_bytes {
        found.push(Finding::SizeOutOfRange {
            size: candidate.size,
            min: limits.min_size_bytes,
            max: limits.max_size_bytes,
        });
    }
    if !candidate.looks_binary {
        found.push(Finding::LooksLikeText);
    }
    if candidate.signature.is_none() {
        found.push(Finding::NoSignature);
    }

    found
}

pub async fn validate(
    path: &Path,
    limits: &FirmwareLimits,
    operator: &dyn Operator,
) -> Result<Verdict> {
    let candidate = inspect(path, limits.sniff_window)?;
    let found = findings(&candidate, limits);

    if found.is_empty() {
        info!(
            "Firmware {} accepted ({} bytes, {})",
            candidate.path.display(),
            candidate.size,
            candidate
                .signature
                .map(|s| s.label())
                .unwrap_or("no signature")
        );
        return Ok(Verdict::Accepted(candidate));
    }

    for finding in &found {
        operator.notify(Notice::Warning, &format!("Firmware check: {finding}"));
        if !operator.confirm("Continue with this file anyway?").await {
            warn!("Firmware rejected by operator: {}", finding);
            return Ok(Verdict::Rejected(finding.clone()));
        }
        warn!("Operator waived firmware check: {}", finding);
    }

    Ok(Verdict::Overridden {
        candidate,
        waived: found,
    })
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(size: u64, looks_binary: bool, signature: Option<Signature>) -> FirmwareCandidate {
        FirmwareCandidate {
            path: "fw.bin".into(),
            size,
            looks_binary,
            signature,
        }
    }

    #[test]
    fn finds_earliest_signature() {
        let mut sample = vec![0xffu8; 64];
        sample[40..44].copy_from_slice(b"hsqs");
        sample[8..12].copy_from_slice(&[0x27, 0x05, 0x19, 0x56]);
        assert_eq!(find_signature(&sample), Some((Signature::UImage, 8)));
    }

    #[test]
    fn no_signature_in_random_bytes() {
        let sample: Vec<u8> = (0..=255u8).collect();
        assert_eq!(find_signature(&sample), None);
    }

    #[test]
    fn text_detection() {
        assert!(!looks_binary(b"#!/bin/sh\necho hello\n"));
        assert!(looks_binary(b"HDR0\0\0\x10\x00"));
        assert!(looks_binary(&[0x80, 0x81, 0x82, b'a']));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn size_band_is_exclusive() {
        let limits = FirmwareLimits {
            min_size_bytes: 100,
            max_size_bytes: 200,
            sniff_window: 16,
        };
        let sig = Some(Signature::Trx);
        assert!(findings(&candidate(150, true, sig), &limits).is_empty());
        assert_eq!(
            findings(&candidate(100, true, sig), &limits),
            vec![Finding::SizeOutOfRange {
                size: 100,
                min: 100,
                max: 200
            }]
        );
        assert_eq!(findings(&candidate(200, true, sig), &limits).len(), 1);
    }

    #[test]
    fn findings_come_in_check_order() {
        let limits = FirmwareLimits::default();
        let found = findings(&candidate(10, false, None), &limits);
        assert!(matches!(found[0], Finding::SizeOutOfRange { .. }));
        assert_eq!(found[1], Finding::LooksLikeText);
        assert_eq!(found[2], Finding::NoSignature);
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(8 * 1024 * 1024), "8.0 MiB");
    }

    #[test]
    fn rejection_maps_to_firmware_invalid() {
        let verdict = Verdict::Rejected(Finding::NoSignature);
        assert!(matches!(
            verdict.into_candidate(),
            Err(RescueError::FirmwareInvalid(_))
        ));
    }
}
