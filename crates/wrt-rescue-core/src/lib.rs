pub mod config;
pub mod error;
pub mod firmware;
pub mod operator;
pub mod types;

pub use config::RescueConfig;
pub use error::{RescueError, Result};
pub use operator::{Notice, Operator, ScriptedOperator};
pub use types::*;
