//! Execute step: run shell commands on a node in order.

use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

pub struct ExecuteStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    commands: Vec<String>,
}

impl ExecuteStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            commands: bag.string_list("command")?,
        })
    }
}

#[async_trait]
impl Step for ExecuteStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        for command in &self.commands {
            let mut result = match self.node.execute(command).await {
                Ok(result) => result,
                Err(err) => {
                    handle.error();
                    return Err(err);
                }
            };
            if result.exit_code != 0 {
                handle.error();
                let stderr = result.stderr.read_all();
                return Err(HarnessError::execution(format!(
                    "command failed with exit code {}: {}",
                    result.exit_code,
                    stderr.trim()
                )));
            }
        }
        handle.complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use gauntlet_common::mock::MockNode;
    use gauntlet_common::ui::formatter::{Formatter, NullFormatter};
    use std::path::Path;

    fn step_config(command_yaml: &str) -> StepConfig {
        let doc = format!(
            "setup:\n  - name: demo\n    node: api\n    step:\n      type: execute\n      options:\n        command: {command_yaml}\n"
        );
        Suite::parse(&doc, Path::new("."), "suite.yaml")
            .unwrap()
            .setup
            .remove(0)
    }

    #[tokio::test]
    async fn commands_run_in_declared_order() {
        let node = Arc::new(MockNode::permissive());
        let cfg = step_config("[\"echo a\", \"echo b\"]");
        let step = ExecuteStep::from_config(&cfg, node.clone()).unwrap();
        let handle = NullFormatter.start_task("demo", "running");
        step.run(handle.as_ref()).await.unwrap();
        assert_eq!(node.executed_commands(), vec!["echo a", "echo b"]);
    }

    #[tokio::test]
    async fn a_nonzero_exit_stops_the_sequence() {
        let node = Arc::new(MockNode::permissive());
        node.respond("false", 1, "", "nope\n");
        let cfg = step_config("[\"false\", \"echo never\"]");
        let step = ExecuteStep::from_config(&cfg, node.clone()).unwrap();
        let handle = NullFormatter.start_task("demo", "running");
        let err = step.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
        assert_eq!(node.executed_commands(), vec!["false"]);
    }
}
