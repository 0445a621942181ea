//! Shared compose stacks with reference counting.
//!
//! Several nodes may refer into the same compose project. The registry
//! hands out one stack per `(compose-file, project)` key and counts
//! references so `up` runs once when the first node arrives and `down`
//! runs once after the last node releases it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;

use gauntlet_common::errors::Result;
use gauntlet_common::exec::{ExecOptions, ExecutionResult};

use crate::platform::host;

/// One `docker compose` project.
pub struct ComposeStack {
    pub compose_file: String,
    pub project_name: String,
}

impl ComposeStack {
    pub fn new(compose_file: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            compose_file: compose_file.into(),
            project_name: project_name.into(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "compose".to_string(),
            "-f".to_string(),
            self.compose_file.clone(),
            "-p".to_string(),
            self.project_name.clone(),
        ]
    }

    pub async fn up(&self) -> Result<()> {
        let mut args = self.base_args();
        args.extend(["up".to_string(), "-d".to_string()]);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        host::run_checked("docker", &arg_refs).await?;
        Ok(())
    }

    pub async fn down(&self) -> Result<()> {
        let mut args = self.base_args();
        args.push("down".to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        host::run_checked("docker", &arg_refs).await?;
        Ok(())
    }

    /// Execute a command in one service of the stack.
    pub async fn exec_in_service(
        &self,
        service: &str,
        node_label: &str,
        command: &str,
        opts: &ExecOptions,
    ) -> Result<ExecutionResult> {
        let shell = opts.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());
        let stdin = opts.sudo.as_ref().and_then(|s| s.resolve());

        let mut cli = Command::new("docker");
        cli.args(self.base_args());
        cli.args(["exec", "-T"]);
        for (key, value) in &opts.env {
            cli.args(["-e", &format!("{key}={value}")]);
        }
        cli.args([service, shell.as_str(), "-c", command]);

        host::capture(cli, node_label, stdin).await
    }
}

/// Key for a stack: the compose file path plus the project name.
pub fn stack_key(compose_file: &str, project_name: &str) -> String {
    format!("{compose_file}::{project_name}")
}

struct RegistryEntry {
    stack: Arc<ComposeStack>,
    refs: usize,
}

/// Ref-counted registry of live compose stacks.
#[derive(Default)]
pub struct ComposeRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl ComposeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stack for `key`, bumping its refcount, or invoke the
    /// factory under the registry lock to bring a new one up.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<ComposeStack>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ComposeStack>>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.stack));
        }

        let stack = factory().await?;
        entries.insert(
            key.to_string(),
            RegistryEntry {
                stack: Arc::clone(&stack),
                refs: 1,
            },
        );
        Ok(stack)
    }

    /// Drop one reference. Returns true iff the caller should tear the
    /// stack down (the count reached zero).
    pub async fn release(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            entries.remove(key);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn factory_runs_once_for_a_shared_key() {
        let registry = ComposeRegistry::new();
        let created = AtomicUsize::new(0);
        let key = stack_key("stack.yml", "proj");

        for _ in 0..3 {
            registry
                .get_or_create(&key, || async {
                    created.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(ComposeStack::new("stack.yml", "proj")))
                })
                .await
                .unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_last_release_requests_teardown() {
        let registry = ComposeRegistry::new();
        let key = stack_key("stack.yml", "proj");

        for _ in 0..3 {
            registry
                .get_or_create(&key, || async {
                    Ok(Arc::new(ComposeStack::new("stack.yml", "proj")))
                })
                .await
                .unwrap();
        }

        assert!(!registry.release(&key).await);
        assert!(!registry.release(&key).await);
        assert!(registry.release(&key).await);
        // Fully released keys are unknown again.
        assert!(!registry.release(&key).await);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_stacks() {
        let registry = ComposeRegistry::new();
        let a = registry
            .get_or_create(&stack_key("a.yml", "p"), || async {
                Ok(Arc::new(ComposeStack::new("a.yml", "p")))
            })
            .await
            .unwrap();
        let b = registry
            .get_or_create(&stack_key("b.yml", "p"), || async {
                Ok(Arc::new(ComposeStack::new("b.yml", "p")))
            })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
