//! File-delete step.

use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

pub struct FileDeleteStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    path: String,
    ignore_errors: bool,
}

impl FileDeleteStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            path: bag.required_str("path")?,
            ignore_errors: bag.bool("ignore_errors"),
        })
    }
}

#[async_trait]
impl Step for FileDeleteStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        if !self.ignore_errors {
            let result = self.node.execute(&format!("test -f '{}'", self.path)).await?;
            if result.exit_code != 0 {
                handle.error();
                return Err(HarnessError::execution(format!(
                    "failed to delete file: file does not exist: {}",
                    self.path
                )));
            }
        }

        let result = self.node.execute(&format!("rm -f '{}'", self.path)).await;
        match result {
            Ok(mut result) if result.exit_code != 0 => {
                if self.ignore_errors {
                    handle.complete();
                    return Ok(());
                }
                handle.error();
                let stderr = result.stderr.read_all();
                Err(HarnessError::execution(format!(
                    "failed to delete file: {}",
                    stderr.trim()
                )))
            }
            Ok(_) => {
                handle.complete();
                Ok(())
            }
            Err(err) => {
                if self.ignore_errors {
                    handle.complete();
                    return Ok(());
                }
                handle.error();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use gauntlet_common::mock::MockNode;
    use gauntlet_common::ui::formatter::{Formatter, NullFormatter};
    use std::path::Path;

    fn parse(options: &str) -> StepConfig {
        let doc = format!(
            "teardown:\n  - name: clean up\n    node: api\n    step:\n      type: file_delete\n      options:\n{options}"
        );
        Suite::parse(&doc, Path::new("."), "suite.yaml")
            .unwrap()
            .teardown
            .remove(0)
    }

    #[tokio::test]
    async fn missing_file_fails_unless_ignored() {
        let node = Arc::new(MockNode::permissive());
        node.respond("test -f '/tmp/gone'", 1, "", "");
        let cfg = parse("        path: /tmp/gone\n");
        let step = FileDeleteStep::from_config(&cfg, node).unwrap();
        let handle = NullFormatter.start_task("clean up", "running");
        let err = step.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn ignore_errors_swallows_failures() {
        let node = Arc::new(MockNode::new());
        node.respond("rm -f '/tmp/gone'", 1, "", "permission denied\n");
        let cfg = parse("        path: /tmp/gone\n        ignore_errors: true\n");
        let step = FileDeleteStep::from_config(&cfg, node.clone()).unwrap();
        let handle = NullFormatter.start_task("clean up", "running");
        step.run(handle.as_ref()).await.unwrap();
        // The existence probe is skipped when errors are ignored.
        assert_eq!(node.executed_commands(), vec!["rm -f '/tmp/gone'"]);
    }
}
