//! Host interface discovery and the operator's pick.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};
use wrt_rescue_core::{
    LinkState, NetworkInterfaceInfo, Notice, Operator, RescueError, Result,
};

use crate::ip;
use crate::runner::CommandRunner;

/// Load USB-Ethernet drivers so adapters plugged in for the recovery show up,
/// then give udev time to create the interfaces. Failures are not fatal.
pub async fn load_usb_drivers(runner: &dyn CommandRunner, drivers: &[String], settle: Duration) {
    let mut loaded = 0;
    for driver in drivers {
        match runner.run("modprobe", &[driver.as_str()]).await {
            Ok(output) if output.success() => {
                debug!("Loaded driver {}", driver);
                loaded += 1;
            }
            Ok(output) => debug!("modprobe {} failed: {}", driver, output.reason()),
            Err(e) => {
                warn!("Cannot load USB network drivers: {}", e);
                break;
            }
        }
    }
    info!("Loaded {}/{} USB network drivers", loaded, drivers.len());

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
}

/// Every interface under `<sysfs_root>/class/net`, sorted by name
pub async fn enumerate(
    sysfs_root: &Path,
    runner: &dyn CommandRunner,
) -> Result<Vec<NetworkInterfaceInfo>> {
    let net_dir = sysfs_root.join("class").join("net");
    let mut entries = tokio::fs::read_dir(&net_dir).await.map_err(|e| {
        RescueError::InterfaceConfigFailed(format!(
            "cannot list interfaces in {}: {}",
            net_dir.display(),
            e
        ))
    })?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut interfaces = Vec::with_capacity(names.len());
    for name in names {
        let dir = net_dir.join(&name);

        let state = match tokio::fs::read_to_string(dir.join("operstate")).await {
            Ok(s) => LinkState::from_operstate(&s),
            Err(_) => LinkState::Unknown,
        };

        let is_usb = tokio::fs::canonicalize(dir.join("device"))
            .await
            .map(|path| path.to_string_lossy().contains("/usb"))
            .unwrap_or(false);

        let addresses = if name == "lo" {
            Vec::new()
        } else {
            match ip::read_addresses(runner, &name).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!("Cannot read addresses of {}: {}", name, e);
                    Vec::new()
                }
            }
        };

        interfaces.push(NetworkInterfaceInfo {
            name,
            state,
            is_usb,
            addresses,
        });
    }

    Ok(interfaces)
}

/// Wired interfaces by name, else anything but loopback
pub fn candidates(all: Vec<NetworkInterfaceInfo>) -> Result<Vec<NetworkInterfaceInfo>> {
    let (wired, others): (Vec<_>, Vec<_>) = all
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .partition(|iface| iface.looks_wired());

    if !wired.is_empty() {
        return Ok(wired);
    }
    if !others.is_empty() {
        warn!("No wired Ethernet interface found by name, offering all interfaces");
        return Ok(others);
    }
    Err(RescueError::NoInterfacesFound)
}

/// Menu line for an interface
pub fn describe(iface: &NetworkInterfaceInfo) -> String {
    let mut line = format!("{} [{}]", iface.name, iface.state);
    if iface.is_usb {
        line.push_str(" (USB)");
    }
    if iface.addresses.is_empty() {
        line.push_str(" no address");
    } else {
        let addrs: Vec<String> = iface.addresses.iter().map(ToString::to_string).collect();
        line.push(' ');
        line.push_str(&addrs.join(", "));
    }
    line
}

/// Pick one of `candidates`.
///
/// `preferred` names the interface directly and skips the menu. Otherwise the
/// operator answers a numbered menu; an answer that is not one of the numbers
/// aborts instead of asking again.
pub async fn select(
    mut candidates: Vec<NetworkInterfaceInfo>,
    preferred: Option<&str>,
    operator: &dyn Operator,
) -> Result<NetworkInterfaceInfo> {
    if candidates.is_empty() {
        return Err(RescueError::NoInterfacesFound);
    }

    if let Some(name) = preferred {
        return match candidates.iter().position(|iface| iface.name == name) {
            Some(index) => Ok(candidates.swap_remove(index)),
            None => Err(RescueError::InvalidSelection(format!(
                "interface {name} is not available"
            ))),
        };
    }

    operator.notify(Notice::Step, "Available network interfaces:");
    for (i, iface) in candidates.iter().enumerate() {
        operator.notify(Notice::Info, &format!("  {}) {}", i + 1, describe(iface)));
    }

    let answer = operator
        .ask(&format!("Select interface [1-{}]: ", candidates.len()))
        .await
        .ok_or_else(|| RescueError::OperatorCancelled("no interface selected".into()))?;

    let index = parse_choice(&answer, candidates.len()).ok_or_else(|| {
        RescueError::InvalidSelection(format!("{:?} is not a number between 1 and {}", answer.trim(), candidates.len()))
    })?;

    Ok(candidates.swap_remove(index))
}

/// 1-based menu answer to a 0-based index
fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let n: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedHost;
    use std::path::PathBuf;
    use wrt_rescue_core::ScriptedOperator;

    fn iface(name: &str) -> NetworkInterfaceInfo {
        NetworkInterfaceInfo {
            name: name.to_string(),
            state: LinkState::Down,
            is_usb: false,
            addresses: vec![],
        }
    }

    /// Minimal sysfs tree: class/net/<name>/{operstate,device}
    fn fake_sysfs(root: &Path, ifaces: &[(&str, &str, bool)]) {
        let net = root.join("class/net");
        std::fs::create_dir_all(&net).unwrap();
        for (name, operstate, usb) in ifaces {
            let dir = net.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("operstate"), format!("{operstate}\n")).unwrap();

            let bus = if *usb {
                PathBuf::from("devices/pci0000:00/0000:00:14.0/usb2/2-1/2-1:1.0")
            } else {
                PathBuf::from("devices/pci0000:00/0000:00:1f.6")
            };
            let device = root.join(&bus).join(name);
            std::fs::create_dir_all(&device).unwrap();
            std::os::unix::fs::symlink(&device, dir.join("device")).unwrap();
        }
    }

    #[tokio::test]
    async fn enumerates_fake_sysfs() {
        let root = tempfile::tempdir().unwrap();
        fake_sysfs(
            root.path(),
            &[("eth0", "up", false), ("enx00e04c", "down", true), ("lo", "unknown", false)],
        );
        let host = SimulatedHost::new()
            .with_interface("eth0", &["10.1.1.5/24"])
            .with_interface("enx00e04c", &[]);

        let all = enumerate(root.path(), &host).await.unwrap();
        let names: Vec<&str> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["enx00e04c", "eth0", "lo"]);

        assert!(all[0].is_usb);
        assert_eq!(all[0].state, LinkState::Down);
        assert!(all[0].addresses.is_empty());

        assert!(!all[1].is_usb);
        assert_eq!(all[1].state, LinkState::Up);
        assert_eq!(all[1].addresses[0].to_string(), "10.1.1.5/24");
    }

    #[tokio::test]
    async fn missing_sysfs_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let host = SimulatedHost::new();
        assert!(enumerate(&root.path().join("nope"), &host).await.is_err());
    }

    #[tokio::test]
    async fn driver_failures_are_tolerated() {
        let host = SimulatedHost::new().fail_on("modprobe r8152");
        let drivers = vec!["r8152".to_string(), "asix".to_string()];
        load_usb_drivers(&host, &drivers, Duration::ZERO).await;
        assert_eq!(host.count("modprobe"), 2);
    }

    #[test]
    fn prefers_wired_interfaces() {
        let picked = candidates(vec![iface("lo"), iface("wlan0"), iface("eth0")]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "eth0");
    }

    #[test]
    fn falls_back_to_non_loopback() {
        let picked = candidates(vec![iface("lo"), iface("wlan0"), iface("br-lan")]).unwrap();
        let names: Vec<&str> = picked.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["wlan0", "br-lan"]);
    }

    #[test]
    fn loopback_only_means_no_interfaces() {
        assert!(matches!(
            candidates(vec![iface("lo")]),
            Err(RescueError::NoInterfacesFound)
        ));
        assert!(matches!(candidates(vec![]), Err(RescueError::NoInterfacesFound)));
    }

    #[test]
    fn menu_choices() {
        assert_eq!(parse_choice("1", 3), Some(0));
        assert_eq!(parse_choice(" 3\n", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("eth0", 3), None);
    }

    #[tokio::test]
    async fn menu_selection_picks_numbered_entry() {
        let operator = ScriptedOperator::new(["2"]);
        let chosen = select(vec![iface("eth0"), iface("eth1")], None, &operator)
            .await
            .unwrap();
        assert_eq!(chosen.name, "eth1");
        assert_eq!(operator.questions(), ["Select interface [1-2]: "]);
    }

    #[tokio::test]
    async fn invalid_menu_answer_aborts_without_reprompt() {
        let operator = ScriptedOperator::new(["7", "1"]);
        let result = select(vec![iface("eth0"), iface("eth1")], None, &operator).await;
        assert!(matches!(result, Err(RescueError::InvalidSelection(_))));
        assert_eq!(operator.questions().len(), 1);
    }

    #[tokio::test]
    async fn preferred_interface_skips_menu() {
        let operator = ScriptedOperator::default();
        let chosen = select(vec![iface("eth0"), iface("eth1")], Some("eth1"), &operator)
            .await
            .unwrap();
        assert_eq!(chosen.name, "eth1");
        assert!(operator.questions().is_empty());

        let missing = select(vec![iface("eth0")], Some("eth9"), &operator).await;
        assert!(matches!(missing, Err(RescueError::InvalidSelection(_))));
    }

    #[test]
    fn describes_interfaces() {
        let mut eth = iface("enx0");
        eth.is_usb = true;
        assert_eq!(describe(&eth), "enx0 [DOWN] (USB) no address");
        eth.addresses = vec!["192.168.8.10/24".parse().unwrap()];
        assert_eq!(describe(&eth), "enx0 [DOWN] (USB) 192.168.8.10/24");
    }
}
