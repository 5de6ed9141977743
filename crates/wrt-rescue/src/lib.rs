//! Command layer of the `wrt-rescue` binary.

pub mod audit;
pub mod commands;
pub mod config;
pub mod prompt;
