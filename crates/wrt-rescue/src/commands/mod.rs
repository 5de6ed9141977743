pub mod check;
pub mod config;
pub mod interfaces;
pub mod recover;
pub mod uboot;
