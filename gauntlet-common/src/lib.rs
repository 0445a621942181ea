//! Shared foundation for the gauntlet test harness.
//!
//! This crate holds everything the controller and the CLI both need:
//! the suite configuration model and YAML loader, error types with
//! source-located diagnostics, the node execution contract, result
//! evaluators, the fact store with its template renderer, and the
//! terminal output layer (progress indicator, output coordinator,
//! stream tee, formatter).

pub mod config;
pub mod errors;
pub mod eval;
pub mod exec;
pub mod facts;
pub mod mock;
pub mod node;
pub mod ui;

pub use errors::{ConfigError, HarnessError, SourceLocation};
pub use exec::{ExecOptions, ExecutionResult, OutputStream, SudoConfig};
pub use node::Node;
