//! Side-effecting collaborators: processes, persistence, prompts, monitoring.

pub mod config;
pub mod executor;
pub mod init;
pub mod ledger;
pub mod monitor;
pub mod process;
pub mod prompt;
