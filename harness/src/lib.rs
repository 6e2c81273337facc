//! Evaluation harness for a headless coding agent.
//!
//! The harness drives the agent against fixture projects, parses its
//! structured execution trace, and checks the pipeline configs it wrote
//! against semantic invariants. The crate keeps the same split as the rest
//! of the workspace:
//!
//! - **[`core`]**: Pure, deterministic logic (trace model, pipeline config
//!   model, assertion engine, baseline comparison). No I/O.
//! - **[`io`]**: Side-effecting operations (agent subprocess, filesystem
//!   discovery, baseline storage, external validator, settings from the
//!   environment).

pub mod core;
pub mod io;
pub mod logging;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
