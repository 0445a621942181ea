//! Scripted node implementation for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{HarnessError, Result};
use crate::exec::{ExecOptions, ExecutionResult};
use crate::node::Node;

/// A [`Node`] that replays canned responses keyed by command string and
/// records every lifecycle call, for exercising the controller and the
/// step/test machinery without real backends.
#[derive(Default)]
pub struct MockNode {
    responses: Mutex<HashMap<String, (i32, String, String)>>,
    failures: Mutex<HashMap<String, String>>,
    /// Commands in the order they were executed.
    pub executed: Mutex<Vec<String>>,
    pub setup_calls: AtomicUsize,
    pub teardown_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    fail_setup: Mutex<Option<String>>,
    /// When no response is scripted, fall back to exit 0 with empty output.
    pub permissive: bool,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that answers every unscripted command with exit 0.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub fn respond(&self, command: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            (exit_code, stdout.to_string(), stderr.to_string()),
        );
    }

    /// Make `execute` return a backend error (not an exit code) for a command.
    pub fn fail_command(&self, command: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(command.to_string(), message.to_string());
    }

    pub fn fail_setup(&self, message: &str) {
        *self.fail_setup.lock().unwrap() = Some(message.to_string());
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Node for MockNode {
    async fn setup(&self) -> Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.fail_setup.lock().unwrap().clone() {
            return Err(HarnessError::execution(msg));
        }
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_with(&self, command: &str, _opts: &ExecOptions) -> Result<ExecutionResult> {
        self.executed.lock().unwrap().push(command.to_string());
        if let Some(msg) = self.failures.lock().unwrap().get(command) {
            return Err(HarnessError::execution(msg.clone()));
        }
        if let Some((code, stdout, stderr)) = self.responses.lock().unwrap().get(command) {
            return Ok(ExecutionResult::new(
                *code,
                stdout.clone().into_bytes(),
                stderr.clone().into_bytes(),
            ));
        }
        if self.permissive {
            return Ok(ExecutionResult::new(0, Vec::new(), Vec::new()));
        }
        Err(HarnessError::internal(format!(
            "mock node has no response for command: {command}"
        )))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_responses() {
        let node = MockNode::new();
        node.respond("echo hello", 0, "hello\n", "");
        let mut result = node.execute("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.read_all(), "hello\n");
        assert_eq!(node.executed_commands(), vec!["echo hello"]);
    }

    #[tokio::test]
    async fn unscripted_command_is_an_error_unless_permissive() {
        let strict = MockNode::new();
        assert!(strict.execute("true").await.is_err());

        let lax = MockNode::permissive();
        assert_eq!(lax.execute("true").await.unwrap().exit_code, 0);
    }
}
