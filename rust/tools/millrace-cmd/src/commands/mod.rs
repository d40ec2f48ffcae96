//! Command implementations for millrace-cmd

pub mod default_config;
pub mod run;
