//! Compose-service node: refers into a shared compose stack.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::{ConfigError, HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::node::Node;

use crate::platform::docker::compose::{stack_key, ComposeRegistry, ComposeStack};

use super::parse_options;

#[derive(Debug, Clone, Default, Deserialize)]
struct ComposeNodeOpts {
    #[serde(default)]
    compose_file: String,
    #[serde(default)]
    project_name: String,
    #[serde(default)]
    service: String,
}

/// Multiple compose nodes may share one `(compose-file, project)` stack;
/// the registry makes `up` and `down` run once per stack.
pub struct ComposeNode {
    name: String,
    opts: ComposeNodeOpts,
    defaults: ExecOptions,
    registry: Arc<ComposeRegistry>,
    stack: Mutex<Option<(Arc<ComposeStack>, String)>>,
}

impl ComposeNode {
    pub fn new(cfg: &NodeConfig, registry: Arc<ComposeRegistry>) -> Result<Self> {
        let opts: ComposeNodeOpts = parse_options(cfg)?;
        if opts.compose_file.is_empty() {
            return Err(ConfigError::new(
                format!("compose_file is required for docker-compose node {:?}", cfg.name),
                cfg.loc.clone(),
            )
            .into());
        }
        Ok(Self {
            name: cfg.name.clone(),
            opts,
            defaults: ExecOptions::from_option_bag(&cfg.options),
            registry,
            stack: Mutex::new(None),
        })
    }

    fn project_name(&self) -> &str {
        if self.opts.project_name.is_empty() {
            &self.name
        } else {
            &self.opts.project_name
        }
    }
}

#[async_trait]
impl Node for ComposeNode {
    async fn setup(&self) -> Result<()> {
        let key = stack_key(&self.opts.compose_file, self.project_name());
        let compose_file = self.opts.compose_file.clone();
        let project = self.project_name().to_string();

        let stack = self
            .registry
            .get_or_create(&key, || async move {
                let stack = Arc::new(ComposeStack::new(compose_file, project));
                stack.up().await?;
                Ok(stack)
            })
            .await?;

        *self.stack.lock().await = Some((stack, key));
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        let Some((stack, key)) = self.stack.lock().await.take() else {
            return Ok(());
        };
        if self.registry.release(&key).await {
            stack.down().await?;
        }
        Ok(())
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        if self.opts.service.is_empty() {
            return Err(HarnessError::execution(format!(
                "no service specified for node {:?} (set 'service' in node options)",
                self.name
            )));
        }
        let guard = self.stack.lock().await;
        let Some((stack, _)) = guard.as_ref() else {
            return Err(HarnessError::execution("compose stack not initialized"));
        };
        let opts = ExecOptions::layered(&self.defaults, opts);
        stack
            .exec_in_service(&self.opts.service, &self.name, command, &opts)
            .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
