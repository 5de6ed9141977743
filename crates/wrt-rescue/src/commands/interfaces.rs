use anyhow::Result;
use wrt_rescue_core::config::NetworkConfig;
use wrt_rescue_core::{Notice, Operator};
use wrt_rescue_net::CommandRunner;
use wrt_rescue_net::interfaces::{self, describe};

/// `wrt-rescue interfaces`: show what the recovery menu would offer
pub async fn run(
    config: &NetworkConfig,
    runner: &dyn CommandRunner,
    operator: &dyn Operator,
    load_drivers: bool,
) -> Result<()> {
    if load_drivers {
        interfaces::load_usb_drivers(runner, &config.usb_drivers, config.settle()).await;
    }

    let all = interfaces::enumerate(&config.sysfs_root, runner).await?;
    let candidates = interfaces::candidates(all)?;

    operator.notify(Notice::Step, "Candidate interfaces:");
    for (i, iface) in candidates.iter().enumerate() {
        operator.notify(Notice::Info, &format!("  {}) {}", i + 1, describe(iface)));
    }
    for iface in &candidates {
        if iface
            .addresses
            .iter()
            .any(|addr| addr.contains(config.target_addr))
        {
            operator.notify(
                Notice::Warning,
                &format!(
                    "{} is already on the recovery subnet of {}",
                    iface.name, config.target_addr
                ),
            );
        }
    }

    Ok(())
}
