//! Pure logic shared by the loop controller, the executor and the gateway.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod conversation;
pub mod tools;
pub mod types;
