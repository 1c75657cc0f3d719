//! Side-effecting adapters: filesystem, git, processes, generator backends
//! and the terminal.

pub mod applier;
pub mod backlog;
pub mod config;
pub mod context;
pub mod generator;
pub mod git;
pub mod process;
pub mod prompt;
pub mod prompter;
pub mod task_log;
pub mod verifier;
