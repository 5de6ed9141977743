use wrt_rescue_core::{Notice, Operator, RescueConfig};

/// U-Boot console commands that pull the image from this host over TFTP,
/// optionally write it to flash, and boot it
pub fn sequence(config: &RescueConfig) -> Vec<String> {
    let load = &config.uboot.load_addr;
    let remote = &config.transfer.remote_name;

    let mut commands = vec![
        format!("setenv ipaddr {}", config.network.target_addr),
        format!("setenv serverip {}", config.network.host_addr.addr),
        format!("tftpboot {} {}", load, remote),
    ];

    if let Some(flash) = &config.uboot.flash_addr {
        let size = config
            .uboot
            .flash_size
            .clone()
            .unwrap_or_else(|| "${filesize}".to_string());
        commands.push(format!("erase {} +{}", flash, size));
        commands.push(format!("cp.b {} {} ${{filesize}}", load, flash));
    }

    commands.push(format!("bootm {}", load));
    commands
}

pub fn run(config: &RescueConfig, operator: &dyn Operator) {
    operator.notify(Notice::Step, "Serial console recovery");
    operator.notify(
        Notice::Info,
        &format!(
            "Serve {} from a TFTP server on {}, interrupt autoboot on the console, then enter:",
            config.transfer.remote_name, config.network.host_addr
        ),
    );
    for command in sequence(config) {
        operator.notify(Notice::Info, &format!("  {}", command));
    }
    if config.uboot.flash_addr.is_none() {
        operator.notify(
            Notice::Warning,
            "No flash address configured: the image boots from RAM and is not written to flash",
        );
    }
}
