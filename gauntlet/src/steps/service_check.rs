//! Service-check step: verify a systemd unit is active on the node.

use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

pub struct ServiceCheckStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    service: String,
}

impl ServiceCheckStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            service: bag.required_str("service")?,
        })
    }
}

#[async_trait]
impl Step for ServiceCheckStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        let command = format!("systemctl is-active {}", self.service);
        let mut result = match self.node.execute(&command).await {
            Ok(result) => result,
            Err(err) => {
                handle.error();
                return Err(err);
            }
        };

        let status = result.stdout.read_all().trim().to_string();
        if status != "active" {
            handle.error();
            return Err(HarnessError::execution(format!(
                "service {} is not active (status: {status})",
                self.service
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

    fn check_step(node: Arc<MockNode>) -> ServiceCheckStep {
        let doc = r#"
setup:
  - name: nginx up
    node: api
    step:
      type: service_check
      options:
        service: nginx
"#;
        let cfg = Suite::parse(doc, Path::new("."), "suite.yaml")
            .unwrap()
            .setup
            .remove(0);
        ServiceCheckStep::from_config(&cfg, node).unwrap()
    }

    #[tokio::test]
    async fn active_service_passes() {
        let node = Arc::new(MockNode::new());
        node.respond("systemctl is-active nginx", 0, "active\n", "");
        let step = check_step(node);
        let handle = NullFormatter.start_task("nginx up", "running");
        step.run(handle.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn inactive_service_fails_with_its_status() {
        let node = Arc::new(MockNode::new());
        node.respond("systemctl is-active nginx", 3, "inactive\n", "");
        let step = check_step(node);
        let handle = NullFormatter.start_task("nginx up", "running");
        let err = step.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("status: inactive"));
    }
}
