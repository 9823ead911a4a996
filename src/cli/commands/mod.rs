//! CLI command implementations.

pub mod config;
pub mod init;
pub mod pool;
pub mod run;
pub mod swarm;
pub mod task;
