//! Transfer through an external TFTP client process.

use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use wrt_rescue_core::TransferOutcome;
use wrt_rescue_core::config::TransferConfig;

use crate::transport::Transport;

/// Longest stderr excerpt kept in a failed outcome
const DETAIL_LIMIT: usize = 400;

#[derive(Debug, Clone)]
pub struct ExternalTransport {
    program: String,
    args: Vec<String>,
    target: Ipv4Addr,
    port: u16,
    block_size: usize,
    block_timeout_secs: u64,
}

impl ExternalTransport {
    pub fn new(config: &TransferConfig, target: Ipv4Addr) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            target,
            port: config.port,
            block_size: config.block_size,
            block_timeout_secs: config.block_timeout_secs,
        }
    }

    /// Argument list for one attempt with all placeholders filled in
    pub fn command_args(&self, file: &Path, remote_name: &str) -> Vec<String> {
        let vars: [(&str, String); 6] = [
            ("{file}", file.to_string_lossy().into_owned()),
            ("{remote}", remote_name.to_string()),
            ("{target}", self.target.to_string()),
            ("{port}", self.port.to_string()),
            ("{blksize}", self.block_size.to_string()),
            ("{timeout}", self.block_timeout_secs.to_string()),
        ];

        self.args
            .iter()
            .map(|arg| {
                vars.iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(*key, value))
            })
            .collect()
    }
}

#[async_trait]
impl Transport for ExternalTransport {
    fn name(&self) -> &str {
        &self.program
    }

    async fn send(&self, file: &Path, remote_name: &str) -> TransferOutcome {
        let args = self.command_args(file, remote_name);
        debug!("exec: {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => TransferOutcome::Success,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let detail = if stderr.trim().is_empty() {
                    stdout.trim()
                } else {
                    stderr.trim()
                };
                TransferOutcome::Failed {
                    code: output.status.code(),
                    detail: truncate(detail, DETAIL_LIMIT),
                }
            }
            Err(e) => TransferOutcome::Failed {
                code: None,
                detail: format!("cannot run {}: {}", self.program, e),
            },
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn transport(program: &str, args: &[&str]) -> ExternalTransport {
        let config = TransferConfig {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        ExternalTransport::new(&config, Ipv4Addr::new(192, 168, 1, 1))
    }

    #[test]
    fn default_template_targets_atftp_put() {
        let t = ExternalTransport::new(&TransferConfig::default(), Ipv4Addr::new(192, 168, 1, 1));
        let args = t.command_args(&PathBuf::from("/tmp/stage/recovery.bin"), "recovery.bin");
        assert_eq!(
            args,
            [
                "--option",
                "blksize 1468",
                "--option",
                "timeout 5",
                "--put",
                "--local-file",
                "/tmp/stage/recovery.bin",
                "--remote-file",
                "recovery.bin",
                "192.168.1.1",
                "69",
            ]
        );
    }

    #[test]
    fn placeholders_expand_inside_arguments() {
        let t = transport("curl", &["-T", "{file}", "tftp://{target}:{port}/{remote}"]);
        let args = t.command_args(&PathBuf::from("fw.bin"), "code.bin");
        assert_eq!(args, ["-T", "fw.bin", "tftp://192.168.1.1:69/code.bin"]);
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let t = transport("true", &[]);
        assert_eq!(t.send(&PathBuf::from("x"), "x").await, TransferOutcome::Success);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_code_and_stderr() {
        let t = transport("sh", &["-c", "echo 'tftp: timeout' >&2; exit 2"]);
        match t.send(&PathBuf::from("x"), "x").await {
            TransferOutcome::Failed { code, detail } => {
                assert_eq!(code, Some(2));
                assert_eq!(detail, "tftp: timeout");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_attempt() {
        let t = transport("wrt-rescue-no-such-tftp-client", &[]);
        assert!(matches!(
            t.send(&PathBuf::from("x"), "x").await,
            TransferOutcome::Failed { code: None, .. }
        ));
    }

    #[test]
    fn truncates_long_detail() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
