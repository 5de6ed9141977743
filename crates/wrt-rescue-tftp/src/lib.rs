pub mod client;
pub mod error;
pub mod external;
pub mod packet;
pub mod transfer;
pub mod transport;

pub use client::NativeTransport;
pub use error::{Result, TftpError};
pub use external::ExternalTransport;
pub use transfer::{RetryGate, TransferObserver, TransferPolicy, TransferSummary, run};
pub use transport::Transport;
