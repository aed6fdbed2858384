//! Validation runner.
//!
//! Executes every validator registered at a trigger point against one action
//! context and reduces their verdicts to a single decision. Each validator
//! runs in its own task under a time bound; a panic, fault or timeout becomes
//! a `Fail` verdict for that validator and never aborts the run.

mod runner;

pub use runner::{RunnerConfig, ValidationRunner, CRASHED_PREFIX, TIMEOUT_REASON};
