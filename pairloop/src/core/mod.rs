//! Deterministic, pure logic of the coordination core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod ansi;
pub mod budget;
pub mod classifier;
pub mod machine;
pub mod patterns;
pub mod reassembler;
pub mod record;
pub mod session;
pub mod types;
pub mod work_items;
