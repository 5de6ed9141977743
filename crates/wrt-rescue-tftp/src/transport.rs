use std::path::Path;

use async_trait::async_trait;
use wrt_rescue_core::TransferOutcome;

/// One way of pushing a file to the target.
///
/// `send` performs a single attempt and reports how it ended. The transfer
/// loop owns the wall-clock budget and drops the future when it runs out, so
/// implementations must stop their work when dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, file: &Path, remote_name: &str) -> TransferOutcome;
}
