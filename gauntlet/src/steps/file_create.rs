//! File-create step: write a file on the node via its shell.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

#[derive(Debug)]
pub struct FileCreateStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    path: String,
    contents: String,
    overwrite: bool,
    mode: String,
    create_dir: bool,
}

/// Normalize the `mode` option to the octal digit string chmod expects.
/// Accepts an integer written in octal digits (644) or a string ("0644").
pub(crate) fn mode_string(bag: &OptionBag<'_>) -> String {
    if let Some(text) = bag.str("mode") {
        return text;
    }
    match bag.int("mode") {
        Some(digits) => format!("{digits:04}"),
        None => "0644".to_string(),
    }
}

impl FileCreateStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            path: bag.required_str("path")?,
            contents: bag.str("contents").unwrap_or_default(),
            overwrite: bag.bool("overwrite"),
            mode: mode_string(&bag),
            create_dir: bag.bool("create_dir"),
        })
    }
}

#[async_trait]
impl Step for FileCreateStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        if self.create_dir {
            let dir = std::path::Path::new(&self.path)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string());
            let mut result = self.node.execute(&format!("mkdir -p '{dir}'")).await?;
            if result.exit_code != 0 {
                handle.error();
                let stderr = result.stderr.read_all();
                return Err(HarnessError::execution(format!(
                    "failed to create directories: {}",
                    stderr.trim()
                )));
            }
        }

        if !self.overwrite {
            let result = self.node.execute(&format!("test -f '{}'", self.path)).await?;
            if result.exit_code == 0 {
                handle.error();
                return Err(HarnessError::execution(format!(
                    "file already exists and overwrite is false: {}",
                    self.path
                )));
            }
        }

        // Base64 transfer keeps arbitrary content safe through the shell.
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.contents.as_bytes());
        let command = format!(
            "echo '{encoded}' | base64 -d > '{path}' && chmod {mode} '{path}'",
            path = self.path,
            mode = self.mode,
        );
        let mut result = self.node.execute(&command).await?;
        if result.exit_code != 0 {
            handle.error();
            let stderr = result.stderr.read_all();
            return Err(HarnessError::execution(format!(
                "failed to create file: {}",
                stderr.trim()
            )));
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

    fn parse(options: &str) -> StepConfig {
        let doc = format!(
            "setup:\n  - name: drop file\n    node: api\n    step:\n      type: file_create\n      options:\n{options}"
        );
        Suite::parse(&doc, Path::new("."), "suite.yaml")
            .unwrap()
            .setup
            .remove(0)
    }

    #[test]
    fn path_is_required() {
        let cfg = parse("        contents: hi\n");
        let err = FileCreateStep::from_config(&cfg, Arc::new(MockNode::permissive())).unwrap_err();
        assert!(err.to_string().contains("path is required"));
    }

    #[test]
    fn mode_accepts_numbers_and_strings() {
        let cfg = parse("        path: /tmp/a\n        mode: 600\n");
        let step = FileCreateStep::from_config(&cfg, Arc::new(MockNode::permissive())).unwrap();
        assert_eq!(step.mode, "0600");

        let cfg = parse("        path: /tmp/a\n        mode: \"0755\"\n");
        let step = FileCreateStep::from_config(&cfg, Arc::new(MockNode::permissive())).unwrap();
        assert_eq!(step.mode, "0755");
    }

    #[tokio::test]
    async fn refuses_to_clobber_without_overwrite() {
        let node = Arc::new(MockNode::permissive());
        node.respond("test -f '/tmp/a'", 0, "", "");
        let cfg = parse("        path: /tmp/a\n        contents: hi\n");
        let step = FileCreateStep::from_config(&cfg, node).unwrap();
        let handle = NullFormatter.start_task("drop file", "running");
        let err = step.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("overwrite is false"));
    }

    #[tokio::test]
    async fn writes_through_the_node_shell() {
        let node = Arc::new(MockNode::permissive());
        node.respond("test -f '/tmp/a'", 1, "", "");
        let cfg = parse("        path: /tmp/a\n        contents: hello\n        create_dir: true\n");
        let step = FileCreateStep::from_config(&cfg, node.clone()).unwrap();
        let handle = NullFormatter.start_task("drop file", "running");
        step.run(handle.as_ref()).await.unwrap();

        let commands = node.executed_commands();
        assert!(commands[0].starts_with("mkdir -p"));
        assert!(commands
            .last()
            .unwrap()
            .contains("base64 -d > '/tmp/a' && chmod 0644 '/tmp/a'"));
    }
}
