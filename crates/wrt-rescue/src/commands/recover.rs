//! The recovery run: validate, pick an interface, borrow it, push the image,
//! give the interface back.
//!
//! The network lease sits in a slot outside the run future. Whether the run
//! finishes or the interrupt fires first, the slot is drained once afterwards
//! and the lease released, so every exit path restores the host.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};
use wrt_rescue_core::config::TransferBackend;
use wrt_rescue_core::firmware::{self, Verdict, human_size};
use wrt_rescue_core::{
    Notice, Operator, RescueConfig, RescueError, Result, TransferAttempt, TransferOutcome,
};
use wrt_rescue_net::interfaces;
use wrt_rescue_net::{CommandRunner, NetworkLease, NetworkPlan, RestoreReport};
use wrt_rescue_tftp::{
    ExternalTransport, NativeTransport, RetryGate, TransferObserver, TransferPolicy,
    TransferSummary, Transport,
};

use crate::audit::AuditLog;
use crate::commands::check::sha256_file;

/// Collaborators of one run
pub struct Recovery<'a> {
    pub config: &'a RescueConfig,
    pub runner: &'a dyn CommandRunner,
    pub operator: &'a dyn Operator,
    pub transport: &'a dyn Transport,
    pub audit: &'a AuditLog,
}

#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Asked for interactively when absent
    pub firmware: Option<PathBuf>,
    /// Skips the interface menu
    pub interface: Option<String>,
}

pub fn build_transport(config: &RescueConfig) -> Box<dyn Transport> {
    let target = config.network.target_addr;
    match config.transfer.backend {
        TransferBackend::External => Box::new(ExternalTransport::new(&config.transfer, target)),
        TransferBackend::Native => Box::new(NativeTransport::new(&config.transfer, target)),
    }
}

/// Outlives the run future; the guard is released when that future is dropped
#[derive(Debug, Default)]
struct LeaseSlot(Mutex<Option<NetworkLease>>);

impl LeaseSlot {
    async fn hold(&self) -> MutexGuard<'_, Option<NetworkLease>> {
        self.0.lock().await
    }

    async fn take(&self) -> Option<NetworkLease> {
        self.0.lock().await.take()
    }
}

/// Run a recovery until it finishes or `interrupt` resolves, then restore the
/// network. An interrupt yields [`RescueError::Interrupted`].
pub async fn run<F>(
    recovery: &Recovery<'_>,
    options: &RecoverOptions,
    interrupt: F,
) -> Result<TransferSummary>
where
    F: Future<Output = ()>,
{
    info!(run_id = recovery.audit.run_id(), "Starting recovery run");
    recovery.audit.run_started(
        options
            .firmware
            .as_ref()
            .map(|p| p.to_string_lossy())
            .as_deref(),
        &recovery.config.network.target_addr.to_string(),
        recovery.transport.name(),
    );

    let slot = LeaseSlot::default();
    let result = tokio::select! {
        result = steps(recovery, options, &slot) => result,
        _ = interrupt => {
            warn!("Interrupt received during recovery");
            recovery
                .operator
                .notify(Notice::Warning, "Interrupted, cleaning up");
            Err(RescueError::Interrupted)
        }
    };

    let restored = match slot.take().await {
        Some(lease) => Some(restore(recovery, lease).await),
        None => None,
    };

    let result = match (result, restored) {
        (Ok(_), Some(report)) if !report.exact() => Err(RescueError::InterfaceConfigFailed(
            format!("network configuration of {} was not fully restored", report.interface),
        )),
        (result, _) => result,
    };

    if let Err(e) = &result {
        error!("Recovery failed: {}", e);
        recovery.audit.run_aborted(&e.to_string());
    }
    result
}

async fn steps(
    recovery: &Recovery<'_>,
    options: &RecoverOptions,
    slot: &LeaseSlot,
) -> Result<TransferSummary> {
    let Recovery {
        config,
        runner,
        operator,
        transport,
        audit,
    } = *recovery;

    let path = match &options.firmware {
        Some(path) => path.clone(),
        None => operator
            .ask("Path to firmware image: ")
            .await
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !answer.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| RescueError::OperatorCancelled("no firmware image given".into()))?,
    };

    operator.notify(Notice::Step, &format!("Checking firmware {}", path.display()));
    let verdict = firmware::validate(&path, &config.firmware, operator).await?;
    let waived = match &verdict {
        Verdict::Overridden { waived, .. } => waived.iter().map(ToString::to_string).collect(),
        _ => Vec::new(),
    };
    let candidate = verdict.into_candidate()?;
    let sha256 = {
        let path = candidate.path.clone();
        tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(anyhow::Error::from)??
    };
    audit.firmware_accepted(
        &candidate.path.to_string_lossy(),
        candidate.size,
        &sha256,
        candidate.signature.map(|s| s.label()),
        waived,
    );
    operator.notify(
        Notice::Success,
        &format!(
            "Firmware accepted: {} ({})",
            human_size(candidate.size),
            candidate
                .signature
                .map(|s| s.label())
                .unwrap_or("no signature")
        ),
    );

    // The bootloader asks for a fixed file name; serve a copy under that name.
    let remote_name = &config.transfer.remote_name;
    let staging = tempfile::Builder::new().prefix("wrt-rescue-").tempdir()?;
    let staged = staging.path().join(remote_name);
    tokio::fs::copy(&candidate.path, &staged).await?;
    info!("Staged firmware at {}", staged.display());

    operator.notify(Notice::Step, "Looking for network interfaces");
    interfaces::load_usb_drivers(runner, &config.network.usb_drivers, config.network.settle())
        .await;
    let all = interfaces::enumerate(&config.network.sysfs_root, runner).await?;
    let candidates = interfaces::candidates(all)?;
    let iface = interfaces::select(candidates, options.interface.as_deref(), operator).await?;

    operator.notify(
        Notice::Step,
        &format!(
            "Configuring {} as {}",
            iface.name, config.network.host_addr
        ),
    );
    let plan = NetworkPlan::from_config(&config.network);
    let mut held = slot.hold().await;
    wrt_rescue_net::configure(runner, &iface, &plan, &mut held).await?;
    if let Some(lease) = held.as_ref() {
        audit.interface_configured(
            lease.interface(),
            lease.host_address(),
            lease.original_addresses(),
            lease.stopped_services(),
            lease.link_up(),
        );
        if !lease.link_up() {
            operator.notify(
                Notice::Warning,
                &format!("No link on {}; check the cable and the router's power", iface.name),
            );
        }
    }
    drop(held);
    operator.notify(Notice::Success, &format!("{} is ready", iface.name));

    if config.network.probe_target {
        let target = config.network.target_addr;
        if wrt_rescue_net::probe_target(runner, &iface.name, target).await {
            operator.notify(Notice::Info, &format!("{} answers on the link", target));
        } else {
            operator.notify(
                Notice::Info,
                &format!("No answer from {} yet; normal while it waits in recovery mode", target),
            );
        }
    }

    operator.notify(
        Notice::Step,
        "Put the router in recovery mode: power it off, hold reset, power it on and release when the LED blinks",
    );

    let policy = TransferPolicy::for_size(candidate.size, &config.transfer);
    let gate = OperatorGate { operator };
    let progress = Progress {
        operator,
        audit,
        remote_name,
    };
    let result =
        wrt_rescue_tftp::run(transport, &staged, remote_name, &policy, &gate, &progress).await;

    match &result {
        Ok(summary) => {
            audit.transfer_completed(summary.attempts, summary.elapsed.as_millis() as u64);
            operator.notify(
                Notice::Success,
                &format!(
                    "Firmware sent after {} attempt(s). Leave the router powered until it reboots on its own",
                    summary.attempts
                ),
            );
        }
        Err(RescueError::TransferExhausted { attempts }) => {
            audit.transfer_exhausted(*attempts);
            operator.notify(
                Notice::Error,
                &format!("No successful transfer in {} attempts", attempts),
            );
        }
        Err(_) => {}
    }

    drop(staging);
    result
}

async fn restore(recovery: &Recovery<'_>, lease: NetworkLease) -> RestoreReport {
    let operator = recovery.operator;
    operator.notify(
        Notice::Step,
        &format!("Restoring network configuration of {}", lease.interface()),
    );

    let report = lease.release(recovery.runner).await;
    recovery.audit.network_restored(&report);

    if report.exact() {
        operator.notify(Notice::Success, "Network configuration restored");
    } else {
        let expected: Vec<String> = report.expected.iter().map(ToString::to_string).collect();
        operator.notify(
            Notice::Error,
            &format!(
                "Could not fully restore {}; expected addresses: {}",
                report.interface,
                if expected.is_empty() { "none".to_string() } else { expected.join(", ") }
            ),
        );
    }
    report
}

/// Asks the operator whether to keep going after a run of failures
struct OperatorGate<'a> {
    operator: &'a dyn Operator,
}

#[async_trait]
impl<'a> RetryGate for OperatorGate<'a> {
    async fn keep_trying(&self, failures: u32, remaining: u32) -> bool {
        self.operator.notify(
            Notice::Warning,
            &format!(
                "{} attempts failed. Is the router in recovery mode and the cable connected?",
                failures
            ),
        );
        self.operator
            .confirm(&format!("Keep trying? ({} attempts left)", remaining))
            .await
    }
}

/// Status lines and audit events per attempt
struct Progress<'a> {
    operator: &'a dyn Operator,
    audit: &'a AuditLog,
    remote_name: &'a str,
}

impl TransferObserver for Progress<'_> {
    fn attempt_started(&self, sequence: u32, max_attempts: u32) {
        self.operator.notify(
            Notice::Info,
            &format!(
                "Attempt {}/{}: sending {}",
                sequence, max_attempts, self.remote_name
            ),
        );
    }

    fn attempt_finished(&self, attempt: &TransferAttempt) {
        self.audit.attempt_finished(attempt);
        match &attempt.outcome {
            TransferOutcome::Success => {}
            TransferOutcome::Timeout => self.operator.notify(
                Notice::Warning,
                &format!(
                    "Attempt {} timed out after {}s",
                    attempt.sequence,
                    attempt.elapsed.as_secs()
                ),
            ),
            TransferOutcome::Failed { code, detail } => self.operator.notify(
                Notice::Warning,
                &format!(
                    "Attempt {} failed{}: {}",
                    attempt.sequence,
                    code.map(|c| format!(" (exit {})", c)).unwrap_or_default(),
                    detail
                ),
            ),
        }
    }

    fn waiting(&self, backoff: Duration) {
        if !backoff.is_zero() {
            self.operator.notify(
                Notice::Info,
                &format!("Retrying in {}s", backoff.as_secs()),
            );
        }
    }
}
