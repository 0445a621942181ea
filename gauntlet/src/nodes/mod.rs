//! Concrete node variants and the factory that builds the node map.

pub mod compose;
pub mod docker;
pub mod local;
pub mod lxd;
pub mod ssh;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::{ConfigError, Result};
use gauntlet_common::node::Node;

use crate::platform::docker::DockerManager;
use crate::platform::lxd::LxdManager;

/// Deserialize a node's option bag into a typed options struct. A missing
/// bag deserializes to the defaults; unknown keys are tolerated.
pub(crate) fn parse_options<T>(cfg: &NodeConfig) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if cfg.options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(cfg.options.clone()).map_err(|err| {
        ConfigError::new(
            format!("invalid options for node {:?}: {err}", cfg.name),
            cfg.loc.clone(),
        )
        .into()
    })
}

/// Build the node map from configuration. Node names must be unique and at
/// most one node may be of the local variant.
pub fn create_nodes(
    configs: &[NodeConfig],
    docker: &DockerManager,
    lxd: &LxdManager,
) -> Result<HashMap<String, Arc<dyn Node>>> {
    let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
    let mut local_seen = false;

    for cfg in configs {
        if nodes.contains_key(&cfg.name) {
            return Err(ConfigError::new(
                format!("duplicate node name {:?}", cfg.name),
                cfg.loc.clone(),
            )
            .with_key_path(format!("nodes.{}.name", cfg.name))
            .into());
        }

        let node: Arc<dyn Node> = match cfg.node_type.as_str() {
            "local" => {
                if local_seen {
                    return Err(ConfigError::new(
                        format!("only one local node allowed; {:?} is a duplicate", cfg.name),
                        cfg.loc.clone(),
                    )
                    .into());
                }
                local_seen = true;
                Arc::new(local::LocalNode::new(cfg)?)
            }
            "ssh" => Arc::new(ssh::SshNode::new(cfg)?),
            "docker" => Arc::new(docker::DockerNode::new(cfg)?),
            "docker-compose" => Arc::new(compose::ComposeNode::new(cfg, docker.compose_registry())?),
            "lxd" => Arc::new(lxd::LxdNode::new(cfg, lxd.cli(), false)?),
            "lxd-vm" => Arc::new(lxd::LxdNode::new(cfg, lxd.cli(), true)?),
            other => {
                return Err(ConfigError::new(
                    format!("unknown node type {other:?}"),
                    cfg.type_loc.clone(),
                )
                .with_key_path(format!("nodes.{}.type", cfg.name))
                .into())
            }
        };

        nodes.insert(cfg.name.clone(), node);
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use std::path::Path;

    fn build(doc: &str) -> Result<HashMap<String, Arc<dyn Node>>> {
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let docker = DockerManager::new(suite.docker.clone());
        let lxd = LxdManager::new(suite.lxd.clone()).unwrap();
        create_nodes(&suite.nodes, &docker, &lxd)
    }

    #[test]
    fn builds_local_and_ssh_nodes() {
        let nodes = build(
            r#"
nodes:
  - name: here
    type: local
  - name: far
    type: ssh
    options:
      host: 192.0.2.10
      user: deploy
      key: /home/deploy/.ssh/id_ed25519
"#,
        )
        .unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains_key("here"));
        assert!(nodes.contains_key("far"));
    }

    #[test]
    fn duplicate_names_are_config_errors() {
        let err = build(
            r#"
nodes:
  - name: twin
    type: local
  - name: twin
    type: ssh
    options: {host: 192.0.2.1, user: root}
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate node name"));
    }

    #[test]
    fn a_second_local_node_is_rejected() {
        let err = build(
            r#"
nodes:
  - name: one
    type: local
  - name: two
    type: local
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("only one local node"));
    }

    #[test]
    fn unknown_node_types_carry_the_type_location() {
        let err = build(
            r#"
nodes:
  - name: odd
    type: mainframe
"#,
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("unknown node type"));
        assert!(text.contains("mainframe"));
    }
}
