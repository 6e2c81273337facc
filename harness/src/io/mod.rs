//! Side-effecting operations: processes, filesystem, environment.

pub mod agent;
pub mod artifacts;
pub mod baseline_store;
pub mod pipeline_store;
pub mod process;
pub mod repo_root;
pub mod settings;
pub mod validator;
