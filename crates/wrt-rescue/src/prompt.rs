//! Operator at a terminal: status lines on stdout, answers from stdin.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use wrt_rescue_core::operator::is_yes;
use wrt_rescue_core::{Notice, Operator};

#[derive(Debug, Default)]
pub struct TerminalOperator;

impl TerminalOperator {
    pub fn new() -> Self {
        Self
    }

    /// Print `prompt` and read one line on the blocking pool so a signal can
    /// still preempt the wait. `None` on end of input or read error.
    async fn read_line(prompt: String) -> Option<String> {
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            print!("{}", prompt.bold());
            stdout.flush().ok()?;

            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn confirm(&self, question: &str) -> bool {
        Self::read_line(format!("{} [y/N] ", question))
            .await
            .map(|answer| is_yes(&answer))
            .unwrap_or(false)
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        Self::read_line(prompt.to_string()).await
    }

    fn notify(&self, notice: Notice, message: &str) {
        println!("{}", render(notice, message));
    }
}

/// Status line with a colored marker
pub fn render(notice: Notice, message: &str) -> String {
    match notice {
        Notice::Step => format!("{} {}", "==>".blue().bold(), message.bold()),
        Notice::Info => message.to_string(),
        Notice::Success => format!("{} {}", "[ok]".green().bold(), message),
        Notice::Warning => format!("{} {}", "[!]".yellow().bold(), message.yellow()),
        Notice::Error => format!("{} {}", "[x]".red().bold(), message.red()),
    }
}
