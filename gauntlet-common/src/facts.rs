//! Fact gathering and option-bag templating.
//!
//! Facts are the trimmed stdout of per-node commands, gathered exactly once
//! after node setup. Between node setup and step/test construction, every
//! string reachable from a step or test config is rewritten: occurrences of
//! `{{ fact "<node>" "<name>" }}` are replaced by the stored value, with
//! `"self"` bound to the config's own node. A string that survives the pass
//! still containing `{{` is a template error, never silently passed through.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{NodeConfig, StepConfig, TestConfig};
use crate::errors::{HarnessError, Result};
use crate::node::Node;

/// `node name -> (fact name -> value)`. Built once, never mutated after.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: HashMap<String, HashMap<String, String>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: &str, fact: &str, value: impl Into<String>) {
        self.facts
            .entry(node.to_string())
            .or_default()
            .insert(fact.to_string(), value.into());
    }

    pub fn get(&self, node: &str, fact: &str) -> Option<&str> {
        self.facts.get(node)?.get(fact).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Run each declared fact command once on its node. Commands must exit 0;
/// trailing whitespace is trimmed from the captured stdout.
pub async fn gather(
    nodes: &HashMap<String, Arc<dyn Node>>,
    configs: &[NodeConfig],
) -> Result<FactStore> {
    let mut store = FactStore::new();

    for cfg in configs {
        if cfg.facts.is_empty() {
            continue;
        }
        let node = nodes.get(&cfg.name).ok_or_else(|| {
            HarnessError::internal(format!("node {} missing while gathering facts", cfg.name))
        })?;

        for (name, command) in &cfg.facts {
            let mut result = node.execute(command).await.map_err(|err| HarnessError::Fact {
                node: cfg.name.clone(),
                fact: name.clone(),
                detail: err.to_string(),
            })?;
            if result.exit_code != 0 {
                let stderr = result.stderr.read_all();
                return Err(HarnessError::Fact {
                    node: cfg.name.clone(),
                    fact: name.clone(),
                    detail: format!(
                        "exited with code {}: {}",
                        result.exit_code,
                        stderr.trim()
                    ),
                });
            }
            let stdout = result.stdout.read_all();
            let value = stdout.trim_end_matches([' ', '\t', '\r', '\n']);
            tracing::debug!(node = %cfg.name, fact = %name, %value, "gathered fact");
            store.insert(&cfg.name, name, value);
        }
    }

    Ok(store)
}

/// Render a single string. Strings without template delimiters pass through
/// untouched; inside `{{ ... }}` only `fact "<node>" "<name>"` is understood.
pub fn render(text: &str, store: &FactStore, current_node: &str) -> Result<String> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(HarnessError::Template(format!(
                "unterminated template delimiter in {text:?}"
            )));
        };
        let expr = &after[..end];
        out.push_str(&eval_expr(expr, store, current_node)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Evaluate one template expression of the form `fact "<node>" "<name>"`.
fn eval_expr(expr: &str, store: &FactStore, current_node: &str) -> Result<String> {
    let mut tokens = tokenize(expr)?;
    if tokens.len() != 3 || tokens[0] != "fact" {
        return Err(HarnessError::Template(format!(
            "unsupported template expression {{{{{expr}}}}}; expected fact \"<node>\" \"<name>\""
        )));
    }
    let fact_name = tokens.pop().unwrap_or_default();
    let mut node_name = tokens.pop().unwrap_or_default();
    if node_name == "self" {
        node_name = current_node.to_string();
    }

    match store.get(&node_name, &fact_name) {
        Some(value) => Ok(value.to_string()),
        None if store.facts.contains_key(&node_name) => Err(HarnessError::Template(format!(
            "fact {fact_name:?} not found on node {node_name:?}"
        ))),
        None => Err(HarnessError::Template(format!(
            "no facts for node {node_name:?}"
        ))),
    }
}

/// Split an expression into bare words and double-quoted strings.
fn tokenize(expr: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut token = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => token.push(c),
                    None => {
                        return Err(HarnessError::Template(format!(
                            "unterminated string in template expression {expr:?}"
                        )))
                    }
                }
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Recursively render every string inside an option bag.
pub fn render_value(
    value: &serde_json::Value,
    store: &FactStore,
    current_node: &str,
) -> Result<serde_json::Value> {
    use serde_json::Value;
    Ok(match value {
        Value::String(s) => Value::String(render(s, store, current_node)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, store, current_node))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, store, current_node)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Render templates inside step config options.
pub fn render_step_configs(configs: &mut [StepConfig], store: &FactStore) -> Result<()> {
    for cfg in configs.iter_mut() {
        let node = cfg.target_node().to_string();
        cfg.step.options = render_value(&cfg.step.options, store, &node)
            .map_err(|err| HarnessError::Template(format!("step {:?}: {err}", cfg.name)))?;
    }
    Ok(())
}

/// Render templates inside test config options and pre/post commands.
pub fn render_test_configs(configs: &mut [TestConfig], store: &FactStore) -> Result<()> {
    for cfg in configs.iter_mut() {
        let node = cfg.target_node().to_string();
        cfg.options = render_value(&cfg.options, store, &node)
            .map_err(|err| HarnessError::Template(format!("test {:?}: {err}", cfg.name)))?;
        for cmd in cfg.setup.iter_mut().chain(cfg.teardown.iter_mut()) {
            *cmd = render(cmd, store, &node)
                .map_err(|err| HarnessError::Template(format!("test {:?}: {err}", cfg.name)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;

    fn store() -> FactStore {
        let mut store = FactStore::new();
        store.insert("api", "cores", "4");
        store.insert("api", "user", "deploy");
        store.insert("db", "cores", "8");
        store
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(render("echo hello", &store(), "api").unwrap(), "echo hello");
    }

    #[test]
    fn renders_named_node_facts() {
        let got = render("taskset -c {{ fact \"db\" \"cores\" }} run", &store(), "api").unwrap();
        assert_eq!(got, "taskset -c 8 run");
    }

    #[test]
    fn self_resolves_to_the_current_node() {
        let got = render("echo {{ fact \"self\" \"cores\" }}", &store(), "api").unwrap();
        assert_eq!(got, "echo 4");
        let got = render("echo {{ fact \"self\" \"cores\" }}", &store(), "db").unwrap();
        assert_eq!(got, "echo 8");
    }

    #[test]
    fn missing_fact_and_missing_node_are_fatal() {
        assert!(render("{{ fact \"api\" \"nope\" }}", &store(), "api").is_err());
        assert!(render("{{ fact \"ghost\" \"cores\" }}", &store(), "api").is_err());
    }

    #[test]
    fn unterminated_delimiters_are_fatal() {
        assert!(render("{{ fact \"api\" \"cores\"", &store(), "api").is_err());
    }

    #[test]
    fn render_value_walks_nested_maps_and_lists() {
        let bag = serde_json::json!({
            "command": ["echo {{ fact \"self\" \"cores\" }}", "true"],
            "nested": {"user": "{{ fact \"api\" \"user\" }}", "count": 2},
        });
        let rendered = render_value(&bag, &store(), "api").unwrap();
        assert_eq!(rendered["command"][0], "echo 4");
        assert_eq!(rendered["nested"]["user"], "deploy");
        assert_eq!(rendered["nested"]["count"], 2);

        // Template closure: no delimiter survives the pass.
        let text = serde_json::to_string(&rendered).unwrap();
        assert!(!text.contains("{{"));
    }

    #[tokio::test]
    async fn gather_runs_each_fact_once_and_trims() {
        let node = MockNode::new();
        node.respond("nproc", 0, "4\n", "");
        node.respond("whoami", 0, "deploy \t\n", "");

        let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
        nodes.insert("api".to_string(), Arc::new(node));

        let cfg = NodeConfig {
            name: "api".into(),
            node_type: "local".into(),
            facts: [
                ("cores".to_string(), "nproc".to_string()),
                ("user".to_string(), "whoami".to_string()),
            ]
            .into(),
            ..Default::default()
        };

        let store = gather(&nodes, std::slice::from_ref(&cfg)).await.unwrap();
        assert_eq!(store.get("api", "cores"), Some("4"));
        assert_eq!(store.get("api", "user"), Some("deploy"));
    }

    #[tokio::test]
    async fn gather_fails_on_nonzero_exit() {
        let node = MockNode::new();
        node.respond("false", 1, "", "boom\n");

        let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
        nodes.insert("api".to_string(), Arc::new(node));

        let cfg = NodeConfig {
            name: "api".into(),
            node_type: "local".into(),
            facts: [("broken".to_string(), "false".to_string())].into(),
            ..Default::default()
        };

        let err = gather(&nodes, std::slice::from_ref(&cfg)).await.unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
