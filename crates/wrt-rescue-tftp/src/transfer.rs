//! Bounded retry loop around a [`Transport`].
//!
//! The router only accepts an upload during a short window after it enters
//! recovery mode, so the loop keeps retrying on a fixed cadence and asks the
//! operator whether to continue after every run of failures.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use wrt_rescue_core::config::TransferConfig;
use wrt_rescue_core::{RescueError, Result, TransferAttempt, TransferOutcome};

use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPolicy {
    pub max_attempts: u32,
    /// Ask the operator after this many consecutive failures
    pub prompt_every: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl TransferPolicy {
    /// Larger images take longer to flash into the router's buffer and get a bigger budget
    pub fn for_size(size: u64, config: &TransferConfig) -> Self {
        let max_attempts = if size >= config.large_threshold_bytes {
            config.attempts_large
        } else {
            config.attempts_small
        };

        Self {
            max_attempts,
            prompt_every: config.prompt_every,
            backoff: Duration::from_secs(config.backoff_secs),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }
}

/// Decides whether the loop continues after a run of failures
#[async_trait]
pub trait RetryGate: Send + Sync {
    async fn keep_trying(&self, failures: u32, remaining: u32) -> bool;
}

/// Progress hooks; every method defaults to doing nothing
pub trait TransferObserver: Send + Sync {
    fn attempt_started(&self, _sequence: u32, _max_attempts: u32) {}

    fn attempt_finished(&self, _attempt: &TransferAttempt) {}

    fn waiting(&self, _backoff: Duration) {}
}

impl TransferObserver for () {}

#[derive(Debug, Clone)]
pub struct TransferSummary {
    /// Attempts made, including the successful one
    pub attempts: u32,
    pub elapsed: Duration,
}

pub async fn run(
    transport: &dyn Transport,
    file: &Path,
    remote_name: &str,
    policy: &TransferPolicy,
    gate: &dyn RetryGate,
    observer: &dyn TransferObserver,
) -> Result<TransferSummary> {
    let run_started = Instant::now();
    let mut failures = 0u32;

    info!(
        "Uploading {} as {} via {} ({} attempts max)",
        file.display(),
        remote_name,
        transport.name(),
        policy.max_attempts
    );

    for sequence in 1..=policy.max_attempts {
        observer.attempt_started(sequence, policy.max_attempts);

        let started_at = Utc::now();
        let attempt_started = Instant::now();
        let outcome = match timeout(policy.attempt_timeout, transport.send(file, remote_name)).await
        {
            Ok(outcome) => outcome,
            Err(_) => TransferOutcome::Timeout,
        };
        let attempt = TransferAttempt {
            sequence,
            outcome,
            started_at,
            elapsed: attempt_started.elapsed(),
        };
        observer.attempt_finished(&attempt);

        match &attempt.outcome {
            TransferOutcome::Success => {
                info!("Transfer succeeded on attempt {}", sequence);
                return Ok(TransferSummary {
                    attempts: sequence,
                    elapsed: run_started.elapsed(),
                });
            }
            TransferOutcome::Timeout => {
                let err = RescueError::TransferTimeout {
                    attempt: sequence,
                    secs: policy.attempt_timeout.as_secs(),
                };
                warn!("{}", err);
            }
            TransferOutcome::Failed { code, detail } => {
                warn!(
                    "Transfer attempt {} failed (exit {:?}): {}",
                    sequence, code, detail
                );
            }
        }

        failures += 1;
        let remaining = policy.max_attempts - sequence;
        if remaining == 0 {
            break;
        }

        if policy.prompt_every > 0 && failures % policy.prompt_every == 0 {
            debug!("{} consecutive failures, consulting operator", failures);
            if !gate.keep_trying(failures, remaining).await {
                return Err(RescueError::OperatorCancelled(format!(
                    "transfer stopped after {} failed attempts",
                    failures
                )));
            }
        }

        observer.waiting(policy.backoff);
        sleep(policy.backoff).await;
    }

    Err(RescueError::TransferExhausted {
        attempts: policy.max_attempts,
    })
}
