use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use wrt_rescue_core::RescueError;
use wrt_rescue_core::config::FirmwareLimits;
use wrt_rescue_core::firmware::{self, Finding, human_size};
use wrt_rescue_core::{FirmwareCandidate, Notice, Operator};

/// Hex SHA-256 of a file, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug)]
pub struct CheckReport {
    pub candidate: FirmwareCandidate,
    pub sha256: String,
    pub findings: Vec<Finding>,
}

/// Run every firmware check without asking anything
pub fn inspect(path: &Path, limits: &FirmwareLimits) -> Result<CheckReport> {
    let candidate = firmware::inspect(path, limits.sniff_window)?;
    let findings = firmware::findings(&candidate, limits);
    let sha256 = sha256_file(path)?;

    Ok(CheckReport {
        candidate,
        sha256,
        findings,
    })
}

/// `wrt-rescue check FIRMWARE`: report and fail when any check fails
pub fn run(path: &Path, limits: &FirmwareLimits, operator: &dyn Operator) -> Result<()> {
    let report = inspect(path, limits)?;
    let candidate = &report.candidate;

    operator.notify(Notice::Step, &format!("Firmware {}", candidate.path.display()));
    operator.notify(
        Notice::Info,
        &format!("  Size:      {} ({} bytes)", human_size(candidate.size), candidate.size),
    );
    operator.notify(
        Notice::Info,
        &format!(
            "  Signature: {}",
            candidate.signature.map(|s| s.label()).unwrap_or("none")
        ),
    );
    operator.notify(
        Notice::Info,
        &format!(
            "  Content:   {}",
            if candidate.looks_binary { "binary" } else { "text" }
        ),
    );
    operator.notify(Notice::Info, &format!("  SHA-256:   {}", report.sha256));

    if report.findings.is_empty() {
        operator.notify(Notice::Success, "All firmware checks passed");
        return Ok(());
    }

    for finding in &report.findings {
        operator.notify(Notice::Warning, &finding.to_string());
    }
    Err(RescueError::FirmwareInvalid(format!(
        "{} check(s) failed",
        report.findings.len()
    ))
    .into())
}
