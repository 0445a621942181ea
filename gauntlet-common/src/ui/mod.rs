//! Terminal output layer.
//!
//! Three pieces cooperate here: the progress [`Spinner`](progress::Spinner)
//! animates the current task, the [`OutputCoordinator`](coordinator) is the
//! single arbiter that interleaves live command output with whatever
//! indicator is active, and the [`Formatter`](formatter) is the surface the
//! controller talks to.

pub mod coordinator;
pub mod formatter;
pub mod progress;
pub mod tee;

/// Which standard stream a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}
