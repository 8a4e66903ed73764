//! Autonomous agent loop that drives a language model to fix a failing test.
//!
//! A run verifies the working copy, lets the model explore and edit it through
//! four tools, verifies again, and records the diff. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure logic (conversation model, tool parsing, shared types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, git, HTTP, logs).
//!   Hidden behind traits where tests need doubles.
//!
//! Orchestration modules ([`agent_loop`], [`pipeline`]) combine the two to
//! implement the CLI commands.

pub mod agent_loop;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
