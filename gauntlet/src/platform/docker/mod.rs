//! Container-runtime platform manager.

pub mod cli;
pub mod compose;

use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::DockerConfig;
use gauntlet_common::errors::Result;

use self::compose::ComposeRegistry;
use super::PlatformManager;

/// Owns the docker-level suite resources: networks and locally built
/// images. Also hosts the process-wide compose-stack registry that
/// compose-service nodes share.
pub struct DockerManager {
    cfg: Option<DockerConfig>,
    registry: Arc<ComposeRegistry>,
}

impl DockerManager {
    pub fn new(cfg: Option<DockerConfig>) -> Self {
        Self {
            cfg,
            registry: Arc::new(ComposeRegistry::new()),
        }
    }

    pub fn compose_registry(&self) -> Arc<ComposeRegistry> {
        Arc::clone(&self.registry)
    }
}

#[async_trait]
impl PlatformManager for DockerManager {
    fn configured(&self) -> bool {
        self.cfg.is_some()
    }

    fn name(&self) -> &str {
        "docker"
    }

    async fn setup(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };

        for net in &cfg.networks {
            tracing::debug!(network = %net.name, "creating docker network");
            cli::create_network(&net.name, &net.subnet, &net.gateway).await?;
        }

        for image in &cfg.images {
            tracing::debug!(image = %image.name, "building docker image");
            cli::build_image(&image.name, &image.tag, &image.dockerfile).await?;
        }

        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };

        for net in &cfg.networks {
            cli::remove_network(&net.name).await?;
        }

        for image in &cfg.images {
            cli::remove_image(&image.name).await?;
        }

        Ok(())
    }
}
