//! Stress test manager
//!
//! Resolves a test directory's layered `.env` configuration into one launch
//! spec per participant, runs each on its host through a remote shell and
//! guarantees that everything started is stopped again.

pub mod cli;
pub mod commands;
pub mod common;
pub mod launch;
pub mod orchestrator;
pub mod supervisor;
pub mod testenv;

// Re-export commonly used types for tests
pub use common::{Error, ErrorClass, Result};
pub use orchestrator::{ClientOutcome, ControlHandle, Orchestrator, RunReport};
pub use testenv::{Cascade, ClientSpec, TestPlan};
