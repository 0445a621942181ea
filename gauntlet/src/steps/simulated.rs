//! Simulated step: an artificial delay.

use std::time::Duration;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::Result;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

pub struct SimulatedStep {
    title: String,
    node_name: String,
    sleep: Duration,
}

impl SimulatedStep {
    pub fn from_config(cfg: &StepConfig) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        let seconds = bag.int("time").unwrap_or(0).max(0) as u64;
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            sleep: Duration::from_secs(seconds),
        })
    }
}

#[async_trait]
impl Step for SimulatedStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        tokio::time::sleep(self.sleep).await;
        handle.complete();
        Ok(())
    }
}
