use thiserror::Error;

#[derive(Error, Debug)]
pub enum TftpError {
    #[error("TFTP error: {0}")]
    Tftp(String),

    /// Error packet sent by the remote side
    #[error("Remote error {code}: {message}")]
    Remote { code: u16, message: String },

    #[error("No response after {0} retries")]
    NoResponse(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TftpError>;
