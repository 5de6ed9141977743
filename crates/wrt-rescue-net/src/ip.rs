//! Thin wrappers around iproute2's one-line (`-o`) output.

use wrt_rescue_core::{InterfaceAddress, LinkState, Result};

use crate::runner::{CommandRunner, run_checked};

pub async fn read_addresses(
    runner: &dyn CommandRunner,
    iface: &str,
) -> Result<Vec<InterfaceAddress>> {
    let output = run_checked(runner, "ip", &["-o", "-4", "addr", "show", "dev", iface]).await?;
    Ok(parse_ipv4_addrs(&output.stdout))
}

pub async fn link_state(runner: &dyn CommandRunner, iface: &str) -> Result<LinkState> {
    let output = run_checked(runner, "ip", &["-o", "link", "show", "dev", iface]).await?;
    Ok(parse_link_state(&output.stdout))
}

/// Addresses from `ip -o -4 addr show`, e.g.
/// `2: eth0    inet 192.168.1.2/24 brd 192.168.1.255 scope global eth0 ...`
pub fn parse_ipv4_addrs(output: &str) -> Vec<InterfaceAddress> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "inet")?;
            tokens.next()?.parse().ok()
        })
        .collect()
}

/// State from `ip -o link show`, e.g. `2: eth0: <...> mtu 1500 ... state UP mode DEFAULT ...`
pub fn parse_link_state(output: &str) -> LinkState {
    let mut tokens = output.split_whitespace();
    match tokens.find(|t| *t == "state").and_then(|_| tokens.next()) {
        Some(state) => LinkState::from_operstate(&state.to_ascii_lowercase()),
        None => LinkState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_address_lines() {
        let out = "\
2: eth0    inet 192.168.1.2/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.0.7/8 scope global secondary eth0\\       valid_lft forever preferred_lft forever
";
        let addrs = parse_ipv4_addrs(out);
        assert_eq!(
            addrs,
            vec![
                InterfaceAddress::new(Ipv4Addr::new(192, 168, 1, 2), 24),
                InterfaceAddress::new(Ipv4Addr::new(10, 0, 0, 7), 8),
            ]
        );
    }

    #[test]
    fn empty_output_means_no_addresses() {
        assert!(parse_ipv4_addrs("").is_empty());
        assert!(parse_ipv4_addrs("garbage line\n").is_empty());
    }

    #[test]
    fn parses_link_state() {
        let up = "2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP mode DEFAULT group default qlen 1000\\    link/ether 00:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff";
        let down = "3: enx0: <NO-CARRIER,BROADCAST,MULTICAST,UP> mtu 1500 qdisc fq_codel state DOWN mode DEFAULT";
        assert_eq!(parse_link_state(up), LinkState::Up);
        assert_eq!(parse_link_state(down), LinkState::Down);
        assert_eq!(parse_link_state(""), LinkState::Unknown);
    }
}
