//! Orchestration library behind the `gauntlet` binary.
//!
//! The controller drives the suite lifecycle: platform resources come up,
//! nodes come up (in parallel), facts are gathered and templates rendered,
//! setup steps run grouped by node, tests run strictly in declaration
//! order, and teardown unwinds everything — with a deferred cleanup that
//! rolls back exactly the prefix that succeeded if anything fails early.

pub mod controller;
pub mod nodes;
pub mod platform;
pub mod prompt;
pub mod steps;
pub mod testcases;
