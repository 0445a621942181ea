//! The node execution contract.

use async_trait::async_trait;

use crate::errors::Result;
use crate::exec::{ExecOptions, ExecutionResult};

/// A uniform execution endpoint: local shell, SSH host, container, system
/// container or VM. The controller owns the node map exclusively; each node
/// owns its backend handles.
///
/// Lifecycle: `setup` prepares the endpoint so `execute` can succeed
/// (connect / create / start / wait-ready), `teardown` destroys whatever
/// `setup` created, `close` releases long-lived handles. The controller
/// never calls `setup` twice on the same node.
#[async_trait]
pub trait Node: Send + Sync {
    async fn setup(&self) -> Result<()>;

    async fn teardown(&self) -> Result<()>;

    /// Run a shell command on the node. Every variant interprets the
    /// command with `/bin/sh -c` semantics or richer.
    async fn execute(&self, command: &str) -> Result<ExecutionResult> {
        self.execute_with(command, &ExecOptions::default()).await
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult>;

    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Node")
    }
}
