//! Side-effecting adapters: filesystem, processes, git, HTTP and logs.

pub mod artifacts;
pub mod config;
pub mod gateway;
pub mod git;
pub mod process;
pub mod prompt;
pub mod task;
pub mod tools;
pub mod transcript;
pub mod verify;
