//! Borrowing one host interface for the recovery subnet.
//!
//! [`configure`] records what it is about to change in a [`NetworkLease`]
//! held by the caller before touching the host. Releasing the lease puts the
//! recorded state back. Only IPv4 is touched; other families stay in place.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};
use wrt_rescue_core::config::NetworkConfig;
use wrt_rescue_core::{InterfaceAddress, LinkState, NetworkInterfaceInfo, RescueError, Result};

use crate::ip;
use crate::runner::{CommandRunner, run_checked};

const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct NetworkPlan {
    pub host: InterfaceAddress,
    pub target: Ipv4Addr,
    pub link_timeout: Duration,
    pub poll_interval: Duration,
    /// Services that would fight over the interface while it is borrowed
    pub managed_services: Vec<String>,
}

impl NetworkPlan {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            host: config.host_addr,
            target: config.target_addr,
            link_timeout: config.link_timeout(),
            poll_interval: LINK_POLL_INTERVAL,
            managed_services: config.managed_services.clone(),
        }
    }
}

/// What [`NetworkLease::release`] managed to put back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub interface: String,
    pub expected: Vec<InterfaceAddress>,
    pub actual: Vec<InterfaceAddress>,
    pub restarted_services: Vec<String>,
    pub errors: Vec<String>,
}

impl RestoreReport {
    /// The interface carries exactly the addresses it had before the run
    pub fn exact(&self) -> bool {
        let mut expected = self.expected.clone();
        let mut actual = self.actual.clone();
        expected.sort();
        actual.sort();
        expected == actual
    }
}

/// Exclusive hold on one interface's configuration.
///
/// `release` consumes the lease, so state is restored at most once. A lease
/// dropped without release logs an error: the host is left on the recovery
/// subnet.
#[derive(Debug)]
pub struct NetworkLease {
    interface: String,
    host: InterfaceAddress,
    original: Vec<InterfaceAddress>,
    stopped_services: Vec<String>,
    link_up: bool,
    released: bool,
}

impl NetworkLease {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn host_address(&self) -> InterfaceAddress {
        self.host
    }

    pub fn original_addresses(&self) -> &[InterfaceAddress] {
        &self.original
    }

    pub fn stopped_services(&self) -> &[String] {
        &self.stopped_services
    }

    /// Whether the link reported up before the poll timed out
    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub async fn release(mut self, runner: &dyn CommandRunner) -> RestoreReport {
        self.released = true;
        let iface = self.interface.clone();
        let mut errors = Vec::new();

        info!("Restoring network configuration of {}", iface);

        if let Err(e) = run_checked(runner, "ip", &["-4", "addr", "flush", "dev", &iface]).await {
            errors.push(e.to_string());
        }
        for addr in &self.original {
            let addr = addr.to_string();
            if let Err(e) = run_checked(runner, "ip", &["addr", "add", &addr, "dev", &iface]).await
            {
                errors.push(e.to_string());
            }
        }

        let mut restarted_services = Vec::new();
        for service in &self.stopped_services {
            match run_checked(runner, "systemctl", &["start", service]).await {
                Ok(_) => restarted_services.push(service.clone()),
                Err(e) => errors.push(e.to_string()),
            }
        }

        let actual = match ip::read_addresses(runner, &iface).await {
            Ok(addrs) => addrs,
            Err(e) => {
                errors.push(e.to_string());
                Vec::new()
            }
        };

        let report = RestoreReport {
            interface: iface,
            expected: self.original.clone(),
            actual,
            restarted_services,
            errors,
        };

        if report.exact() {
            info!(
                "Network configuration of {} restored ({} address(es))",
                report.interface,
                report.expected.len()
            );
        } else {
            error!(
                "Could not restore {}: expected {:?}, found {:?}",
                report.interface, report.expected, report.actual
            );
        }
        for e in &report.errors {
            warn!("Restore step failed: {}", e);
        }

        report
    }
}

impl Drop for NetworkLease {
    fn drop(&mut self) {
        if !self.released {
            error!(
                "Network lease on {} dropped without restoring {:?}",
                self.interface, self.original
            );
        }
    }
}

/// Put `iface` on the recovery subnet.
///
/// The lease lands in `held` before the first mutation and is updated as the
/// host changes, so a caller that stops polling this future midway still
/// holds everything it needs to restore. On error the lease has already been
/// taken out of `held` and released.
pub async fn configure(
    runner: &dyn CommandRunner,
    iface: &NetworkInterfaceInfo,
    plan: &NetworkPlan,
    held: &mut Option<NetworkLease>,
) -> Result<()> {
    let name = iface.name.clone();
    let original = ip::read_addresses(runner, &name)
        .await
        .map_err(|e| config_failed(&name, e))?;

    info!(
        "Configuring {} as {} (previous addresses: {:?})",
        name, plan.host, original
    );

    let lease = held.insert(NetworkLease {
        interface: name,
        host: plan.host,
        original,
        stopped_services: Vec::new(),
        link_up: false,
        released: false,
    });

    match apply(runner, lease, plan).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{}", e);
            if let Some(lease) = held.take() {
                lease.release(runner).await;
            }
            Err(e)
        }
    }
}

async fn apply(
    runner: &dyn CommandRunner,
    lease: &mut NetworkLease,
    plan: &NetworkPlan,
) -> Result<()> {
    for service in &plan.managed_services {
        if !service_active(runner, service).await {
            continue;
        }
        // Recorded before the stop is issued
        lease.stopped_services.push(service.clone());
        match run_checked(runner, "systemctl", &["stop", service]).await {
            Ok(_) => info!("Stopped {} for the duration of the recovery", service),
            Err(e) => {
                lease.stopped_services.pop();
                warn!("Could not stop {}: {}", service, e);
            }
        }
    }

    lease.link_up = assign(runner, &lease.interface, plan).await?;
    Ok(())
}

/// Flush IPv4, add, bring up, wait for link, verify. Returns whether the link came up.
async fn assign(runner: &dyn CommandRunner, iface: &str, plan: &NetworkPlan) -> Result<bool> {
    let host = plan.host.to_string();

    run_checked(runner, "ip", &["-4", "addr", "flush", "dev", iface])
        .await
        .map_err(|e| config_failed(iface, e))?;
    run_checked(runner, "ip", &["addr", "add", &host, "dev", iface])
        .await
        .map_err(|e| config_failed(iface, e))?;
    run_checked(runner, "ip", &["link", "set", "dev", iface, "up"])
        .await
        .map_err(|e| config_failed(iface, e))?;

    let link_up = wait_for_link(runner, iface, plan.link_timeout, plan.poll_interval).await;
    if !link_up {
        warn!(
            "{} did not report link up within {:?}; is the cable plugged in and the router powered?",
            iface, plan.link_timeout
        );
    }

    let present = ip::read_addresses(runner, iface)
        .await
        .map_err(|e| config_failed(iface, e))?;
    if !present.contains(&plan.host) {
        return Err(RescueError::InterfaceConfigFailed(format!(
            "{host} is not present on {iface} after assignment (found {present:?})"
        )));
    }

    info!("{} configured with {}", iface, host);
    Ok(link_up)
}

async fn wait_for_link(
    runner: &dyn CommandRunner,
    iface: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(LinkState::Up) = ip::link_state(runner, iface).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn service_active(runner: &dyn CommandRunner, service: &str) -> bool {
    match runner.run("systemctl", &["is-active", service]).await {
        Ok(output) => output.stdout.trim() == "active",
        Err(_) => false,
    }
}

/// ARP-probe the target. Silence is normal while the bootloader waits for an
/// image, so this only informs.
pub async fn probe_target(runner: &dyn CommandRunner, iface: &str, target: Ipv4Addr) -> bool {
    let target = target.to_string();
    match runner
        .run("arping", &["-c", "3", "-w", "3", "-I", iface, &target])
        .await
    {
        Ok(output) if output.success() => {
            info!("{} answers ARP on {}", target, iface);
            true
        }
        Ok(_) => {
            info!(
                "No ARP reply from {}; expected while the device sits in recovery mode",
                target
            );
            false
        }
        Err(e) => {
            warn!("ARP probe unavailable: {}", e);
            false
        }
    }
}

fn config_failed(iface: &str, err: RescueError) -> RescueError {
    match err {
        RescueError::InterfaceConfigFailed(_) => err,
        other => RescueError::InterfaceConfigFailed(format!("{iface}: {other}")),
    }
}
