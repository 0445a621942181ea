//! System-container runtime platform manager.

pub mod cli;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::LxdConfig;
use gauntlet_common::errors::{HarnessError, Result};

use self::cli::LxdCli;
use super::detect;
use super::images::translate_image;
use super::PlatformManager;

const DEFAULT_PROJECT: &str = "default";

/// Owns suite-wide system-container resources: an optional project,
/// networks, pre-fetched images and profiles. The shared CLI handle is
/// rebound into the project during setup so node operations land there
/// too.
pub struct LxdManager {
    cfg: Option<LxdConfig>,
    cli: Arc<LxdCli>,
}

impl LxdManager {
    /// Build the manager, honoring an explicitly configured socket path and
    /// falling back to runtime auto-detection.
    pub fn new(cfg: Option<LxdConfig>) -> Result<Self> {
        let runtime = match cfg.as_ref().and_then(|c| c.socket.as_deref()) {
            Some(socket) => detect::runtime_for_socket(socket),
            None => match detect::detect_runtime() {
                Ok(detection) => detection.runtime,
                // The runtime may be absent entirely when no lxd nodes are
                // in play; default the CLI flavor and let node setup fail
                // with a concrete error if it is actually needed.
                Err(_) if cfg.is_none() => detect::Runtime::Lxd,
                Err(err) => return Err(err),
            },
        };

        Ok(Self {
            cfg,
            cli: Arc::new(LxdCli::new(runtime)),
        })
    }

    /// Handle shared with lxd nodes.
    pub fn cli(&self) -> Arc<LxdCli> {
        Arc::clone(&self.cli)
    }
}

#[async_trait]
impl PlatformManager for LxdManager {
    fn configured(&self) -> bool {
        self.cfg.is_some()
    }

    fn name(&self) -> &str {
        "lxd"
    }

    async fn setup(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };

        if let Some(project) = &cfg.project {
            if project.name.is_empty() {
                return Err(HarnessError::execution("project name cannot be empty"));
            }
            tracing::debug!(project = %project.name, "creating project");
            self.cli.create_project(&project.name, &project.config).await?;

            // A fresh project has no default profile; instances cannot be
            // created until one exists.
            self.cli
                .copy_profile_to_project("default", DEFAULT_PROJECT, &project.name)
                .await?;

            self.cli.use_project(&project.name);
        }

        for net in &cfg.networks {
            tracing::debug!(network = %net.name, "creating network");
            self.cli.create_network(&net.name, &net.subnet, &net.gateway).await?;
        }

        for image in &cfg.images {
            let reference = translate_image(&image.alias, self.cli.runtime());
            tracing::debug!(image = %reference, "pre-fetching image");
            self.cli.copy_image(&reference, &image.alias).await?;
        }

        for profile in &cfg.profiles {
            tracing::debug!(profile = %profile.name, "applying profile");
            self.cli.apply_profile(profile).await?;
        }

        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let Some(cfg) = &self.cfg else {
            return Ok(());
        };

        for net in &cfg.networks {
            self.cli.delete_network(&net.name).await?;
        }

        for image in &cfg.images {
            self.cli.delete_image(&image.alias).await?;
        }

        for profile in &cfg.profiles {
            if profile.name != "default" {
                self.cli.delete_profile(&profile.name).await?;
            }
        }

        if let Some(project) = &cfg.project {
            // Node teardown must have emptied the project by now; deleting
            // resources underneath live instances would strand them.
            let remaining = self.cli.instances_in_project(&project.name).await?;
            if remaining > 0 {
                return Err(HarnessError::Teardown {
                    unit: format!("project {}", project.name),
                    detail: format!(
                        "project still contains {remaining} instance(s), cannot delete"
                    ),
                });
            }
            self.cli.clear_project();
            self.cli.delete_project(&project.name).await?;
        }

        Ok(())
    }
}
