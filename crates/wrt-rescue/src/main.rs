use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use wrt_rescue::audit::AuditLog;
use wrt_rescue::commands::{self, recover};
use wrt_rescue::config;
use wrt_rescue::prompt::TerminalOperator;
use wrt_rescue_core::config::{LogFormat, LoggingConfig, TransferBackend, validate_config};
use wrt_rescue_core::RescueError;
use wrt_rescue_net::SystemRunner;

#[derive(Parser)]
#[command(name = "wrt-rescue")]
#[command(about = "Push a firmware image to a router waiting in bootloader recovery mode", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "/etc/wrt-rescue/config.toml")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this interface instead of asking
    #[arg(short, long)]
    interface: Option<String>,

    /// Override the configured transfer backend
    #[arg(long, value_enum)]
    backend: Option<TransferBackend>,

    /// Firmware image to send; asked for when omitted
    firmware: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the interfaces a recovery would offer
    Interfaces {
        /// Load USB-Ethernet drivers first
        #[arg(long)]
        load_drivers: bool,
    },

    /// Run the firmware checks only
    Check {
        /// Firmware image to inspect
        firmware: PathBuf,
    },

    /// Print the U-Boot console commands for a serial recovery
    Uboot,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // A prompt may still be blocked on stdin
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            let code = e
                .downcast_ref::<RescueError>()
                .map(RescueError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code.clamp(1, 255) as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = config::load_config(&cli.config).await?;
    if let Some(backend) = cli.backend {
        config.transfer.backend = backend;
    }

    let _log_guard = init_logging(&config.logging, cli.verbose)?;
    let operator = TerminalOperator::new();
    let runner = SystemRunner;

    match cli.command {
        Some(Commands::InitConfig { force }) => {
            commands::config::init(&cli.config, force, &operator).await
        }
        Some(Commands::CheckConfig) => commands::config::check(&cli.config, &config, &operator),
        Some(Commands::Interfaces { load_drivers }) => {
            validate_config(&config)?;
            commands::interfaces::run(&config.network, &runner, &operator, load_drivers).await
        }
        Some(Commands::Check { firmware }) => {
            validate_config(&config)?;
            commands::check::run(&firmware, &config.firmware, &operator)
        }
        Some(Commands::Uboot) => {
            validate_config(&config)?;
            commands::uboot::run(&config, &operator);
            Ok(())
        }
        None => {
            validate_config(&config)?;
            let transport = recover::build_transport(&config);
            let audit = AuditLog::new(config.logging.audit_enabled);
            let recovery = recover::Recovery {
                config: &config,
                runner: &runner,
                operator: &operator,
                transport: transport.as_ref(),
                audit: &audit,
            };
            let options = recover::RecoverOptions {
                firmware: cli.firmware,
                interface: cli.interface,
            };
            recover::run(&recovery, &options, shutdown_signal()).await?;
            Ok(())
        }
    }
}

/// Diagnostics go to stderr or the configured file; stdout belongs to the operator
fn init_logging(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(log_file) = &logging.file else {
        match logging.format {
            LogFormat::Json => builder.json().with_writer(std::io::stderr).init(),
            LogFormat::Text => builder.with_writer(std::io::stderr).init(),
        }
        return Ok(None);
    };

    let dir = match log_file.parent() {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => std::path::Path::new("."),
    };
    let file_name = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("logging.file must include a file name"))?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match logging.format {
        LogFormat::Json => builder.json().with_writer(non_blocking).init(),
        LogFormat::Text => builder.with_ansi(false).with_writer(non_blocking).init(),
    }

    Ok(Some(guard))
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
