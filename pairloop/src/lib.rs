//! Two-role coordination of an external coding assistant.
//!
//! A Planner role decomposes a goal into work items and reviews finished
//! work; an Executor role carries each item out. Both are the same external
//! process invoked with different prompts. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (stream reassembly, output
//!   classification, the coordination state machine, Session bookkeeping).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (process execution, prompt
//!   rendering, the Session ledger, monitoring, config). Behind traits so
//!   tests can script them.
//!
//! [`coordinator`] ties the two together into the Session loop and
//! [`agents`] holds the per-role prompt and classification policy.

pub mod agents;
pub mod cancel;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
