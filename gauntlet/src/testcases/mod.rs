//! Tests and their factory.

pub mod execute;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::TestConfig;
use gauntlet_common::errors::{ConfigError, Result};
use gauntlet_common::eval::EvalResult;
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TestHandle;

/// A primary command with pre/post commands and evaluators, bound to one
/// node. Run returns the evaluation outcomes keyed by evaluator name; an
/// `Err` is a backend failure, distinct from evaluation misses.
#[async_trait]
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, handle: &dyn TestHandle) -> Result<HashMap<String, EvalResult>>;
}

impl std::fmt::Debug for dyn TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TestCase")
    }
}

/// Build tests from configuration in declaration order.
pub fn create_tests(
    configs: &[TestConfig],
    nodes: &HashMap<String, Arc<dyn Node>>,
) -> Result<Vec<Arc<dyn TestCase>>> {
    let mut sorted: Vec<&TestConfig> = configs.iter().collect();
    sorted.sort_by_key(|cfg| cfg.order);

    let mut tests: Vec<Arc<dyn TestCase>> = Vec::with_capacity(sorted.len());
    for cfg in sorted {
        let node_name = cfg.target_node().to_string();
        let node = nodes.get(&node_name).cloned().ok_or_else(|| {
            ConfigError::new(
                format!(
                    "node {:?} not found (referenced in test {:?})",
                    node_name, cfg.name
                ),
                cfg.node_loc.clone(),
            )
            .with_key_path(format!("tests.{}.node", cfg.name))
        })?;

        let test: Arc<dyn TestCase> = match cfg.test_type.as_str() {
            "execute" => Arc::new(execute::ExecuteTest::from_config(cfg, node)?),
            other => {
                return Err(ConfigError::new(
                    format!("unknown test type {other:?}"),
                    cfg.type_loc.clone(),
                )
                .into())
            }
        };
        tests.push(test);
    }

    Ok(tests)
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

    #[test]
    fn tests_come_out_in_declaration_order() {
        let doc = r#"
tests:
  - name: first
    node: api
    type: execute
    options: {command: "true"}
  - name: second
    node: api
    type: execute
    options: {command: "true"}
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let tests = create_tests(&suite.tests, &nodes()).unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].name(), "first");
        assert_eq!(tests[1].name(), "second");
    }

    #[test]
    fn unknown_test_type_is_fatal() {
        let doc = r#"
tests:
  - name: odd
    node: api
    type: telepathy
    options: {}
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let err = create_tests(&suite.tests, &nodes()).unwrap_err();
        assert!(err.to_string().contains("unknown test type"));
    }

    #[test]
    fn missing_node_is_fatal_with_the_node_location() {
        let doc = r#"
tests:
  - name: orphan
    node: ghost
    type: execute
    options: {command: "true"}
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let err = create_tests(&suite.tests, &nodes()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
