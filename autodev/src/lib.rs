//! Automated code-modification agent.
//!
//! For each task (from a markdown backlog, the command line or an
//! interactive prompt) the agent asks a generator for a complete set of file
//! contents, writes them, runs the project's checker, and either commits or
//! rolls back and retries with the checker's diagnostics. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (backlog parsing, proposal
//!   parsing, the retry state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process
//!   execution, generator backends, terminal prompts). Behind traits where
//!   tests need fakes.
//!
//! Orchestration modules ([`pipeline`], [`looping`], [`analyze`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod analyze;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
