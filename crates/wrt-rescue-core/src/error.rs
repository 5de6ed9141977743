use thiserror::Error;

#[derive(Error, Debug)]
pub enum RescueError {
    #[error("Firmware rejected: {0}")]
    FirmwareInvalid(String),

    #[error("No usable network interface found")]
    NoInterfacesFound,

    #[error("Invalid interface selection: {0}")]
    InvalidSelection(String),

    #[error("Interface configuration failed: {0}")]
    InterfaceConfigFailed(String),

    /// A single attempt ran past its wall-clock budget. Retried by the transfer loop.
    #[error("Transfer attempt {attempt} timed out after {secs}s")]
    TransferTimeout { attempt: u32, secs: u64 },

    #[error("Transfer failed after {attempts} attempts")]
    TransferExhausted { attempts: u32 },

    #[error("Cancelled by operator: {0}")]
    OperatorCancelled(String),

    #[error("Interrupted by signal")]
    Interrupted,

    #[error("Command `{program}` failed: {detail}")]
    Command { program: String, detail: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RescueError {
    /// Whether this error ends the run. A timed out attempt does not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RescueError::TransferTimeout { .. })
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() { 1 } else { 0 }
    }

    pub fn command(program: impl Into<String>, detail: impl Into<String>) -> Self {
        RescueError::Command {
            program: program.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RescueError>;
