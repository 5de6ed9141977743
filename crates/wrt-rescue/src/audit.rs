use serde::{Deserialize, Serialize};
use tracing::{Level, event};
use uuid::Uuid;
use wrt_rescue_core::{InterfaceAddress, TransferAttempt};
use wrt_rescue_net::RestoreReport;

/// Audit trail of a recovery run.
///
/// One JSON object per step, logged on the `audit` target so it can be
/// filtered or routed separately from diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        #[serde(flatten)]
        common: CommonFields,
        firmware: Option<String>,
        target_addr: String,
        backend: String,
    },

    FirmwareAccepted {
        #[serde(flatten)]
        common: CommonFields,
        path: String,
        size: u64,
        sha256: String,
        signature: Option<String>,
        /// Checks the operator chose to ignore
        waived: Vec<String>,
    },

    InterfaceConfigured {
        #[serde(flatten)]
        common: CommonFields,
        interface: String,
        host_addr: String,
        previous_addrs: Vec<String>,
        stopped_services: Vec<String>,
        link_up: bool,
    },

    AttemptFinished {
        #[serde(flatten)]
        common: CommonFields,
        sequence: u32,
        outcome: String,
        started_at: String,
        duration_ms: u64,
    },

    TransferCompleted {
        #[serde(flatten)]
        common: CommonFields,
        attempts: u32,
        duration_ms: u64,
    },

    TransferExhausted {
        #[serde(flatten)]
        common: CommonFields,
        attempts: u32,
    },

    NetworkRestored {
        #[serde(flatten)]
        common: CommonFields,
        interface: String,
        restored_addrs: Vec<String>,
        restarted_services: Vec<String>,
        exact: bool,
        errors: Vec<String>,
    },

    RunAborted {
        #[serde(flatten)]
        common: CommonFields,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonFields {
    /// ISO 8601 timestamp
    pub timestamp: String,
    pub hostname: String,
    pub service: String,
    /// info, warn or error
    pub severity: String,
    /// Shared by every event of one run
    pub run_id: String,
}

impl CommonFields {
    fn new(severity: &str, run_id: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: "wrt-rescue".to_string(),
            severity: severity.to_string(),
            run_id: run_id.to_string(),
        }
    }
}

impl AuditEvent {
    pub fn log(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"Failed to serialize audit event: {:?}\"}}",
                self
            )
        });

        match self.common().severity.as_str() {
            "error" => event!(target: "audit", Level::ERROR, audit_event = %json),
            "warn" => event!(target: "audit", Level::WARN, audit_event = %json),
            _ => event!(target: "audit", Level::INFO, audit_event = %json),
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            AuditEvent::RunStarted { common, .. }
            | AuditEvent::FirmwareAccepted { common, .. }
            | AuditEvent::InterfaceConfigured { common, .. }
            | AuditEvent::AttemptFinished { common, .. }
            | AuditEvent::TransferCompleted { common, .. }
            | AuditEvent::TransferExhausted { common, .. }
            | AuditEvent::NetworkRestored { common, .. }
            | AuditEvent::RunAborted { common, .. } => common,
        }
    }
}

/// Builds and logs the events of one run under a single run id
#[derive(Debug, Clone)]
pub struct AuditLog {
    enabled: bool,
    run_id: String,
}

impl AuditLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn common(&self, severity: &str) -> CommonFields {
        CommonFields::new(severity, &self.run_id)
    }

    fn emit(&self, event: AuditEvent) {
        if self.enabled {
            event.log();
        }
    }

    pub fn run_started(&self, firmware: Option<&str>, target_addr: &str, backend: &str) {
        self.emit(AuditEvent::RunStarted {
            common: self.common("info"),
            firmware: firmware.map(str::to_string),
            target_addr: target_addr.to_string(),
            backend: backend.to_string(),
        });
    }

    pub fn firmware_accepted(
        &self,
        path: &str,
        size: u64,
        sha256: &str,
        signature: Option<&str>,
        waived: Vec<String>,
    ) {
        let severity = if waived.is_empty() { "info" } else { "warn" };
        self.emit(AuditEvent::FirmwareAccepted {
            common: self.common(severity),
            path: path.to_string(),
            size,
            sha256: sha256.to_string(),
            signature: signature.map(str::to_string),
            waived,
        });
    }

    pub fn interface_configured(
        &self,
        interface: &str,
        host_addr: InterfaceAddress,
        previous: &[InterfaceAddress],
        stopped_services: &[String],
        link_up: bool,
    ) {
        self.emit(AuditEvent::InterfaceConfigured {
            common: self.common(if link_up { "info" } else { "warn" }),
            interface: interface.to_string(),
            host_addr: host_addr.to_string(),
            previous_addrs: previous.iter().map(ToString::to_string).collect(),
            stopped_services: stopped_services.to_vec(),
            link_up,
        });
    }

    pub fn attempt_finished(&self, attempt: &TransferAttempt) {
        let severity = if attempt.outcome.is_success() { "info" } else { "warn" };
        self.emit(AuditEvent::AttemptFinished {
            common: self.common(severity),
            sequence: attempt.sequence,
            outcome: attempt.outcome.to_string(),
            started_at: attempt.started_at.to_rfc3339(),
            duration_ms: attempt.elapsed.as_millis() as u64,
        });
    }

    pub fn transfer_completed(&self, attempts: u32, duration_ms: u64) {
        self.emit(AuditEvent::TransferCompleted {
            common: self.common("info"),
            attempts,
            duration_ms,
        });
    }

    pub fn transfer_exhausted(&self, attempts: u32) {
        self.emit(AuditEvent::TransferExhausted {
            common: self.common("error"),
            attempts,
        });
    }

    pub fn network_restored(&self, report: &RestoreReport) {
        let exact = report.exact();
        self.emit(AuditEvent::NetworkRestored {
            common: self.common(if exact { "info" } else { "error" }),
            interface: report.interface.clone(),
            restored_addrs: report.actual.iter().map(ToString::to_string).collect(),
            restarted_services: report.restarted_services.clone(),
            exact,
            errors: report.errors.clone(),
        });
    }

    pub fn run_aborted(&self, reason: &str) {
        self.emit(AuditEvent::RunAborted {
            common: self.common("error"),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_flat_with_type_tag() {
        let event = AuditEvent::TransferExhausted {
            common: CommonFields::new("error", "run-1"),
            attempts: 10,
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event_type"], "transfer_exhausted");
        assert_eq!(value["attempts"], 10);
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["service"], "wrt-rescue");
        assert_eq!(value["severity"], "error");
    }

    #[test]
    fn events_round_trip_through_json() {
        let event = AuditEvent::FirmwareAccepted {
            common: CommonFields::new("warn", "run-2"),
            path: "/tmp/fw.bin".into(),
            size: 42,
            sha256: "00".into(),
            signature: None,
            waived: vec!["no known firmware signature".into()],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.common().run_id, "run-2");
        assert!(matches!(back, AuditEvent::FirmwareAccepted { size: 42, .. }));
    }

    #[test]
    fn every_run_gets_its_own_id() {
        assert_ne!(AuditLog::new(true).run_id(), AuditLog::new(true).run_id());
    }
}
