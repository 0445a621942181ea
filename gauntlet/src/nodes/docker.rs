//! Container node: one privileged container created from a named image.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::node::Node;

use crate::platform::docker::cli;

use super::parse_options;

const READY_TIMEOUT: Duration = Duration::from_secs(120);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize)]
struct DockerNodeOpts {
    #[serde(default)]
    image: String,
    #[serde(default = "default_privileged")]
    privileged: bool,
}

fn default_privileged() -> bool {
    true
}

pub struct DockerNode {
    name: String,
    opts: DockerNodeOpts,
    defaults: ExecOptions,
}

impl DockerNode {
    pub fn new(cfg: &NodeConfig) -> Result<Self> {
        Ok(Self {
            name: cfg.name.clone(),
            opts: parse_options(cfg)?,
            defaults: ExecOptions::from_option_bag(&cfg.options),
        })
    }

    /// Readiness is Running plus a successful probe command.
    async fn wait_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            let running = cli::container_running(&self.name).await.unwrap_or(false);
            if running {
                if let Ok(result) =
                    cli::exec(&self.name, &self.name, "true", &ExecOptions::default()).await
                {
                    if result.exit_code == 0 {
                        return Ok(());
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::ReadinessTimeout {
                    what: format!("container {}", self.name),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Node for DockerNode {
    async fn setup(&self) -> Result<()> {
        cli::create_container(&self.name, &self.name, &self.opts.image, self.opts.privileged)
            .await?;
        cli::start_container(&self.name).await?;
        self.wait_ready().await
    }

    async fn teardown(&self) -> Result<()> {
        cli::stop_container(&self.name).await?;
        cli::remove_container(&self.name).await
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let opts = ExecOptions::layered(&self.defaults, opts);
        cli::exec(&self.name, &self.name, command, &opts).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
