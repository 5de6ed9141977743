//! Host network side of a recovery run: finding an interface, borrowing it
//! for the recovery subnet and giving it back.

pub mod configure;
pub mod interfaces;
pub mod ip;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod simulated;

pub use configure::{NetworkLease, NetworkPlan, RestoreReport, configure, probe_target};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
