//! Setup/teardown steps and their factory.

pub mod apt;
pub mod execute;
pub mod file_create;
pub mod file_delete;
pub mod file_edit;
pub mod http_request;
pub mod service_check;
pub mod simulated;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{ConfigError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

/// A single setup or teardown action bound to one node.
#[async_trait]
pub trait Step: Send + Sync {
    fn title(&self) -> &str;
    /// Name of the node the step runs on; used to group steps so that
    /// per-node order is preserved under cross-node concurrency.
    fn node_name(&self) -> &str;
    async fn run(&self, handle: &dyn TaskHandle) -> Result<()>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Step")
    }
}

/// Option-bag accessors. Shape errors carry the config's location.
pub(crate) struct OptionBag<'a> {
    cfg: &'a StepConfig,
}

impl<'a> OptionBag<'a> {
    pub fn new(cfg: &'a StepConfig) -> Self {
        Self { cfg }
    }

    fn error(&self, message: String) -> ConfigError {
        ConfigError::new(message, self.cfg.loc.clone())
    }

    pub fn required_str(&self, key: &str) -> Result<String> {
        match self.cfg.step.options.get(key).and_then(|v| v.as_str()) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(self
                .error(format!("{key} is required in step {:?}", self.cfg.name))
                .into()),
        }
    }

    pub fn str(&self, key: &str) -> Option<String> {
        self.cfg
            .step
            .options
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn bool(&self, key: &str) -> bool {
        self.cfg
            .step
            .options
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.cfg.step.options.get(key).and_then(|v| v.as_i64())
    }

    /// A string, or a list of strings, upgraded to a list.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.cfg.step.options.get(key) {
            Some(serde_json::Value::String(s)) => Ok(vec![s.clone()]),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        self.error(format!(
                            "{key} entry is not a string in step {:?}",
                            self.cfg.name
                        ))
                        .into()
                    })
                })
                .collect(),
            Some(_) => Err(self
                .error(format!(
                    "{key} must be a string or array of strings in step {:?}",
                    self.cfg.name
                ))
                .into()),
            None => Err(self
                .error(format!("{key} is required in step {:?}", self.cfg.name))
                .into()),
        }
    }
}

/// Build concrete steps from configuration. Each config targets exactly
/// one node by the time it arrives here.
pub fn create_steps(
    configs: &[StepConfig],
    nodes: &HashMap<String, Arc<dyn Node>>,
) -> Result<Vec<Arc<dyn Step>>> {
    let mut steps: Vec<Arc<dyn Step>> = Vec::with_capacity(configs.len());

    for cfg in configs {
        let node_name = cfg.target_node().to_string();
        let node = nodes.get(&node_name).cloned().ok_or_else(|| {
            ConfigError::new(
                format!(
                    "node {:?} not found (referenced in step {:?})",
                    node_name, cfg.name
                ),
                cfg.node_loc.clone(),
            )
            .with_key_path(format!("steps.{}.node", cfg.name))
        })?;

        let step: Arc<dyn Step> = match cfg.step.step_type.as_str() {
            "simulated" => Arc::new(simulated::SimulatedStep::from_config(cfg)?),
            "execute" => Arc::new(execute::ExecuteStep::from_config(cfg, node)?),
            "apt" => Arc::new(apt::AptStep::from_config(cfg, node)?),
            "file_create" => Arc::new(file_create::FileCreateStep::from_config(cfg, node)?),
            "file_delete" => Arc::new(file_delete::FileDeleteStep::from_config(cfg, node)?),
            "file_edit" => Arc::new(file_edit::FileEditStep::from_config(cfg, node)?),
            "http_request" => Arc::new(http_request::HttpRequestStep::from_config(cfg)?),
            "service_check" => Arc::new(service_check::ServiceCheckStep::from_config(cfg, node)?),
            other => {
                return Err(ConfigError::new(
                    format!("unknown step type {other:?}"),
                    cfg.step.type_loc.clone(),
                )
                .into())
            }
        };
        steps.push(step);
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use gauntlet_common::mock::MockNode;
    use std::path::Path;

    fn nodes() -> HashMap<String, Arc<dyn Node>> {
        let mut map: HashMap<String, Arc<dyn Node>> = HashMap::new();
        map.insert("api".to_string(), Arc::new(MockNode::permissive()));
        map
    }

    fn parse_steps(doc: &str) -> Vec<StepConfig> {
        Suite::parse(doc, Path::new("."), "suite.yaml").unwrap().setup
    }

    #[test]
    fn builds_each_known_type() {
        let configs = parse_steps(
            r#"
setup:
  - name: wait a beat
    node: api
    step:
      type: simulated
      options: {time: 1}
  - name: warm caches
    node: api
    step:
      type: execute
      options:
        command: ["true", "true"]
  - name: packages
    node: api
    step:
      type: apt
      options:
        packages: [curl, jq]
"#,
        );
        let steps = create_steps(&configs, &nodes()).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].title(), "wait a beat");
        assert_eq!(steps[0].node_name(), "api");
    }

    #[test]
    fn missing_node_is_a_config_error_at_the_node_key() {
        let configs = parse_steps(
            r#"
setup:
  - name: orphan
    node: ghost
    step:
      type: execute
      options: {command: "true"}
"#,
        );
        let err = create_steps(&configs, &nodes()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn unknown_step_type_is_fatal() {
        let configs = parse_steps(
            r#"
setup:
  - name: odd
    node: api
    step:
      type: teleport
      options: {}
"#,
        );
        let err = create_steps(&configs, &nodes()).unwrap_err();
        assert!(err.to_string().contains("unknown step type"));
    }

    #[test]
    fn single_command_string_upgrades_to_a_list() {
        let configs = parse_steps(
            r#"
setup:
  - name: single
    node: api
    step:
      type: execute
      options: {command: "echo one"}
"#,
        );
        let bag = OptionBag::new(&configs[0]);
        assert_eq!(bag.string_list("command").unwrap(), vec!["echo one"]);
    }

    #[test]
    fn non_string_command_entries_are_rejected() {
        let configs = parse_steps(
            r#"
setup:
  - name: bad
    node: api
    step:
      type: execute
      options:
        command: [1, 2]
"#,
        );
        let err = create_steps(&configs, &nodes()).unwrap_err();
        assert!(err.to_string().contains("not a string"));
    }
}
