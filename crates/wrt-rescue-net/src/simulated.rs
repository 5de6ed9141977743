//! In-memory host that answers the commands the configurator issues.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use wrt_rescue_core::{InterfaceAddress, Result};

use crate::runner::{CommandOutput, CommandRunner};

#[derive(Debug, Default)]
struct HostState {
    addresses: BTreeMap<String, Vec<InterfaceAddress>>,
    ipv6: BTreeMap<String, Vec<String>>,
    links_up: BTreeSet<String>,
    active_services: BTreeSet<String>,
    failing: Vec<String>,
    drop_address_adds: bool,
    never_link_up: bool,
    target_answers_arp: bool,
    log: Vec<String>,
}

/// Simulated Linux host speaking just enough `ip`, `systemctl`, `modprobe`
/// and `arping` for a recovery run.
#[derive(Debug, Default)]
pub struct SimulatedHost {
    state: Mutex<HostState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(self, name: &str, addresses: &[&str]) -> Self {
        let parsed = addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect::<Vec<InterfaceAddress>>();
        self.lock().addresses.insert(name.to_string(), parsed);
        self
    }

    /// Adds an IPv6 address; the IPv4 view in `ip -o -4 addr show` never lists it
    pub fn with_ipv6(self, name: &str, address: &str) -> Self {
        self.lock()
            .ipv6
            .entry(name.to_string())
            .or_default()
            .push(address.to_string());
        self
    }

    pub fn with_active_service(self, name: &str) -> Self {
        self.lock().active_services.insert(name.to_string());
        self
    }

    /// Any command line starting with `prefix` exits with status 1
    pub fn fail_on(self, prefix: &str) -> Self {
        self.lock().failing.push(prefix.to_string());
        self
    }

    /// `ip addr add` reports success without the address appearing
    pub fn dropping_address_adds(self) -> Self {
        self.lock().drop_address_adds = true;
        self
    }

    pub fn with_dead_link(self) -> Self {
        self.lock().never_link_up = true;
        self
    }

    pub fn with_responsive_target(self) -> Self {
        self.lock().target_answers_arp = true;
        self
    }

    pub fn addresses(&self, iface: &str) -> Vec<InterfaceAddress> {
        self.lock()
            .addresses
            .get(iface)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ipv6_addresses(&self, iface: &str) -> Vec<String> {
        self.lock().ipv6.get(iface).cloned().unwrap_or_default()
    }

    pub fn service_active(&self, name: &str) -> bool {
        self.lock().active_services.contains(name)
    }

    /// Every command line run so far
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CommandRunner for SimulatedHost {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = format!("{} {}", program, args.join(" "));
        let mut guard = self.lock();
        let state = &mut *guard;
        state.log.push(line.clone());

        if state.failing.iter().any(|prefix| line.starts_with(prefix)) {
            return Ok(CommandOutput::failed(1, "simulated failure"));
        }

        let output = match (program, args) {
            ("ip", ["-o", "-4", "addr", "show", "dev", iface]) => {
                match state.addresses.get(*iface) {
                    Some(addrs) => CommandOutput::ok(render_addrs(iface, addrs)),
                    None => no_such_device(iface),
                }
            }
            ("ip", ["-o", "link", "show", "dev", iface]) => {
                if !state.addresses.contains_key(*iface) {
                    no_such_device(iface)
                } else {
                    let up = state.links_up.contains(*iface) && !state.never_link_up;
                    CommandOutput::ok(format!(
                        "2: {iface}: <BROADCAST,MULTICAST> mtu 1500 state {} mode DEFAULT\n",
                        if up { "UP" } else { "DOWN" }
                    ))
                }
            }
            ("ip", ["-4", "addr", "flush", "dev", iface]) => match state.addresses.get_mut(*iface) {
                Some(addrs) => {
                    addrs.clear();
                    CommandOutput::ok("")
                }
                None => no_such_device(iface),
            },
            ("ip", ["addr", "flush", "dev", iface]) => match state.addresses.get_mut(*iface) {
                Some(addrs) => {
                    addrs.clear();
                    state.ipv6.remove(*iface);
                    CommandOutput::ok("")
                }
                None => no_such_device(iface),
            },
            ("ip", ["addr", "add", addr, "dev", iface]) => {
                let drop_adds = state.drop_address_adds;
                match (addr.parse::<InterfaceAddress>(), state.addresses.get_mut(*iface)) {
                    (Ok(_), Some(_)) if drop_adds => CommandOutput::ok(""),
                    (Ok(parsed), Some(addrs)) if addrs.contains(&parsed) => {
                        CommandOutput::failed(2, "RTNETLINK answers: File exists")
                    }
                    (Ok(parsed), Some(addrs)) => {
                        addrs.push(parsed);
                        CommandOutput::ok("")
                    }
                    (Err(_), _) => CommandOutput::failed(1, format!("invalid address {addr}")),
                    (_, None) => no_such_device(iface),
                }
            }
            ("ip", ["link", "set", "dev", iface, "up"]) => {
                if state.addresses.contains_key(*iface) {
                    state.links_up.insert(iface.to_string());
                    CommandOutput::ok("")
                } else {
                    no_such_device(iface)
                }
            }
            ("systemctl", ["is-active", service]) => {
                if state.active_services.contains(*service) {
                    CommandOutput::ok("active\n")
                } else {
                    CommandOutput {
                        status: Some(3),
                        stdout: "inactive\n".to_string(),
                        stderr: String::new(),
                    }
                }
            }
            ("systemctl", ["stop", service]) => {
                state.active_services.remove(*service);
                CommandOutput::ok("")
            }
            ("systemctl", ["start", service]) => {
                state.active_services.insert(service.to_string());
                CommandOutput::ok("")
            }
            ("modprobe", [_driver]) => CommandOutput::ok(""),
            ("arping", _) => {
                if state.target_answers_arp {
                    CommandOutput::ok("Received 3 response(s)\n")
                } else {
                    CommandOutput::failed(1, "Received 0 response(s)")
                }
            }
            _ => CommandOutput::failed(127, format!("{program}: not simulated")),
        };

        Ok(output)
    }
}

fn render_addrs(iface: &str, addrs: &[InterfaceAddress]) -> String {
    addrs
        .iter()
        .map(|a| {
            format!("2: {iface}    inet {a} scope global {iface}\\       valid_lft forever preferred_lft forever\n")
        })
        .collect()
}

fn no_such_device(iface: &str) -> CommandOutput {
    CommandOutput::failed(1, format!("Device \"{iface}\" does not exist."))
}
