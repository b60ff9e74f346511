// src/plan/mod.rs

//! Two-phase plan pipeline
//!
//! Evaluation walks recipe steps, expands composites into primitives, and
//! pins every non-deterministic input (asset globs, checksums, lockfiles).
//! Execution then runs the pinned plan sequentially against an
//! `ExecutionContext`. The phases are deliberately asymmetric: evaluation
//! may touch the network, execution may touch the filesystem, and nothing
//! crosses over.

pub mod eval;
pub mod exec;

pub use eval::{EvalContext, Plan, decompose_to_primitives, evaluate};
pub use exec::{ExecutionContext, Executor, Installer};
