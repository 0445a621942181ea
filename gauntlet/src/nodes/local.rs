//! The local node: commands run in a shell on the host itself.

use async_trait::async_trait;
use tokio::process::Command;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::Result;
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::node::Node;

use crate::platform::host;

use super::parse_options;

/// Executes on the host shell. At most one instance per suite.
pub struct LocalNode {
    name: String,
    defaults: ExecOptions,
}

impl LocalNode {
    pub fn new(cfg: &NodeConfig) -> Result<Self> {
        // The local node has no backend options of its own; the bag only
        // carries execution defaults (env, shell, sudo).
        let _: serde_json::Value = parse_options(cfg)?;
        Ok(Self {
            name: cfg.name.clone(),
            defaults: ExecOptions::from_option_bag(&cfg.options),
        })
    }
}

#[async_trait]
impl Node for LocalNode {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let opts = ExecOptions::layered(&self.defaults, opts);
        let shell = opts.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());
        let stdin = opts.sudo.as_ref().and_then(|s| s.resolve());

        let mut cli = Command::new(&shell);
        cli.args(["-c", command]);
        for (key, value) in &opts.env {
            cli.env(key, value);
        }

        host::capture(cli, &self.name, stdin).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use std::path::Path;

    fn local_node(options: &str) -> LocalNode {
        let doc = format!("nodes:\n  - name: here\n    type: local\n{options}");
        let suite = Suite::parse(&doc, Path::new("."), "suite.yaml").unwrap();
        LocalNode::new(&suite.nodes[0]).unwrap()
    }

    #[tokio::test]
    async fn runs_shell_commands() {
        let node = local_node("");
        let mut result = node.execute("echo hello").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.read_all(), "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exits_are_results_not_errors() {
        let node = local_node("");
        let result = node.execute("exit 7").await.unwrap();
        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn default_env_from_options_reaches_the_command() {
        let node = local_node("    options:\n      env:\n        GREETING: hi\n");
        let mut result = node.execute("printf '%s' \"$GREETING\"").await.unwrap();
        assert_eq!(result.stdout.read_all(), "hi");
    }
}
