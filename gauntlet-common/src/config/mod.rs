//! Suite configuration model and YAML loader.
//!
//! Loading happens in stages: `!!load_from(dir)` directives are spliced
//! into the raw text, the document is deserialized, source locations are
//! recovered from the raw text for diagnostics, and finally steps/tests
//! that target a list of nodes are expanded into one copy per node.

mod locations;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::errors::{ConfigError, Result, SourceLocation};

/// Top-level suite document. Immutable after load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Suite {
    #[serde(default)]
    pub suite: String,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
    #[serde(default)]
    pub lxd: Option<LxdConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub setup: Vec<StepConfig>,
    #[serde(default)]
    pub teardown: Vec<StepConfig>,
    #[serde(default)]
    pub tests: Vec<TestConfig>,
}

/// Container-runtime platform resources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub images: Vec<ImageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub dockerfile: String,
}

/// System-container runtime platform resources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdConfig {
    /// Explicit socket path; when absent the runtime is auto-detected.
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default)]
    pub project: Option<LxdProjectConfig>,
    #[serde(default)]
    pub networks: Vec<LxdNetworkConfig>,
    #[serde(default)]
    pub profiles: Vec<LxdProfileConfig>,
    #[serde(default)]
    pub images: Vec<LxdImageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdNetworkConfig {
    pub name: String,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdProfileConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub devices: BTreeMap<String, LxdDeviceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdDeviceConfig {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdImageConfig {
    pub alias: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub protocol: String,
}

/// A single execution target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub options: serde_json::Value,
    /// Fact name -> shell command, run once on the node after setup.
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(skip)]
    pub loc: SourceLocation,
    #[serde(skip)]
    pub type_loc: SourceLocation,
}

/// A setup or teardown step. After [`Suite::load`] each step targets
/// exactly one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(deserialize_with = "string_or_seq", default)]
    pub node: Vec<String>,
    pub step: StepDetails,
    #[serde(skip)]
    pub loc: SourceLocation,
    #[serde(skip)]
    pub node_loc: SourceLocation,
}

impl StepConfig {
    /// The single node this step targets. Valid only after expansion.
    pub fn target_node(&self) -> &str {
        self.node.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDetails {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(skip)]
    pub type_loc: SourceLocation,
}

/// A test: a primary command plus pre/post commands and evaluators.
/// After [`Suite::load`] each test targets exactly one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestConfig {
    /// Declaration order, used to sort before execution.
    #[serde(skip)]
    pub order: usize,
    pub name: String,
    #[serde(deserialize_with = "string_or_seq", default)]
    pub node: Vec<String>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub teardown: Vec<String>,
    #[serde(rename = "type")]
    pub test_type: String,
    #[serde(default)]
    pub options: serde_json::Value,
    #[serde(skip)]
    pub loc: SourceLocation,
    #[serde(skip)]
    pub node_loc: SourceLocation,
    #[serde(skip)]
    pub type_loc: SourceLocation,
}

impl TestConfig {
    pub fn target_node(&self) -> &str {
        self.node.first().map(String::as_str).unwrap_or_default()
    }
}

fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrSeq {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrSeq::deserialize(deserializer)? {
        StringOrSeq::One(s) => vec![s],
        StringOrSeq::Many(v) => v,
    })
}

impl Suite {
    /// Load a suite from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Suite> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&data, dir, &path.to_string_lossy())
    }

    /// Parse a suite document. `base_dir` anchors `!!load_from` directives
    /// and relative dockerfile paths; `file_name` is used in diagnostics.
    pub fn parse(data: &str, base_dir: &Path, file_name: &str) -> Result<Suite> {
        let data = splice_load_from(data, base_dir)?;

        let mut suite: Suite = serde_yaml::from_str(&data).map_err(|err| {
            let loc = err
                .location()
                .map(|l| SourceLocation::new(file_name, l.line(), l.column()))
                .unwrap_or_default();
            ConfigError::new(format!("invalid suite document: {err}"), loc)
        })?;

        locations::annotate(&data, file_name, &mut suite);

        suite.setup = expand_step_configs(std::mem::take(&mut suite.setup));
        suite.teardown = expand_step_configs(std::mem::take(&mut suite.teardown));
        suite.tests = expand_test_configs(std::mem::take(&mut suite.tests));

        for (idx, test) in suite.tests.iter_mut().enumerate() {
            test.order = idx;
        }

        if let Some(docker) = &mut suite.docker {
            for image in &mut docker.images {
                if !image.dockerfile.is_empty() && !image.dockerfile.starts_with('/') {
                    image.dockerfile = base_dir.join(&image.dockerfile).to_string_lossy().into_owned();
                }
            }
        }

        Ok(suite)
    }

    /// True if any node declares facts.
    pub fn has_facts(&self) -> bool {
        self.nodes.iter().any(|n| !n.facts.is_empty())
    }
}

/// Expand steps targeting a node list into one copy per node. An empty
/// list yields zero copies.
fn expand_step_configs(configs: Vec<StepConfig>) -> Vec<StepConfig> {
    let mut out = Vec::with_capacity(configs.len());
    for cfg in configs {
        for node in &cfg.node {
            let mut copy = cfg.clone();
            copy.node = vec![node.clone()];
            out.push(copy);
        }
    }
    out
}

fn expand_test_configs(configs: Vec<TestConfig>) -> Vec<TestConfig> {
    let mut out = Vec::with_capacity(configs.len());
    for cfg in configs {
        for node in &cfg.node {
            let mut copy = cfg.clone();
            copy.node = vec![node.clone()];
            out.push(copy);
        }
    }
    out
}

/// Replace every `!!load_from(<dir>)` directive with the concatenated
/// contents of the `*.yaml`/`*.yml` files under `<dir>`, indented to sit
/// beneath the directive's line.
fn splice_load_from(data: &str, base_dir: &Path) -> Result<String> {
    const DIRECTIVE: &str = "!!load_from(";

    if !data.contains(DIRECTIVE) {
        return Ok(data.to_string());
    }

    let mut out_lines: Vec<String> = Vec::new();
    for line in data.split('\n') {
        let Some(start) = line.find(DIRECTIVE) else {
            out_lines.push(line.to_string());
            continue;
        };
        let rest = &line[start + DIRECTIVE.len()..];
        let Some(end) = rest.find(')') else {
            return Err(ConfigError::new(
                format!("unterminated load_from directive: {line}"),
                SourceLocation::default(),
            )
            .into());
        };
        let dir = base_dir.join(&rest[..end]);
        let loaded = load_directory(&dir)?;
        let indented = indent(&loaded, "  ");
        out_lines.push(format!("{}\n{}", &line[..start], indented));
    }

    Ok(out_lines.join("\n"))
}

fn load_directory(dir: &Path) -> Result<String> {
    let mut buffer = String::new();
    let mut files: Vec<PathBuf> = Vec::new();
    collect_yaml_files(dir, &mut files)?;
    files.sort();
    for file in files {
        buffer.push_str(&std::fs::read_to_string(&file)?);
        buffer.push('\n');
    }
    Ok(buffer)
}

fn collect_yaml_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml_files(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}

fn indent(data: &str, prefix: &str) -> String {
    data.split('\n')
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BASIC: &str = r#"
suite: sample
nodes:
  - name: api
    type: local
tests:
  - name: echo works
    node: api
    type: execute
    options:
      command: echo hello
      evaluate:
        exit_code: 0
        match: hello
"#;

    #[test]
    fn parses_a_basic_suite() {
        let suite = Suite::parse(BASIC, Path::new("."), "suite.yaml").unwrap();
        assert_eq!(suite.suite, "sample");
        assert_eq!(suite.nodes.len(), 1);
        assert_eq!(suite.tests.len(), 1);
        assert_eq!(suite.tests[0].target_node(), "api");
        assert_eq!(suite.tests[0].order, 0);
    }

    #[test]
    fn expands_node_lists_into_copies() {
        let doc = r#"
suite: expansion
nodes:
  - name: n1
    type: local
  - name: n2
    type: ssh
setup:
  - name: touch marker
    node: [n1, n2]
    step:
      type: execute
      options:
        command: "true"
tests:
  - name: check marker
    node: [n1, n2]
    type: execute
    options:
      command: "true"
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        assert_eq!(suite.setup.len(), 2);
        assert_eq!(suite.setup[0].target_node(), "n1");
        assert_eq!(suite.setup[1].target_node(), "n2");
        assert_eq!(suite.setup[0].name, suite.setup[1].name);
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.tests[1].order, 1);
    }

    #[test]
    fn empty_node_list_yields_zero_copies() {
        let doc = r#"
suite: empty
nodes:
  - name: n1
    type: local
setup:
  - name: skipped
    node: []
    step:
      type: execute
      options:
        command: "true"
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        assert!(suite.setup.is_empty());
    }

    #[test]
    fn load_from_splices_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        let frag_dir = dir.path().join("nodes.d");
        std::fs::create_dir(&frag_dir).unwrap();
        let mut frag = std::fs::File::create(frag_dir.join("api.yaml")).unwrap();
        writeln!(frag, "- name: api").unwrap();
        writeln!(frag, "  type: local").unwrap();

        let doc = "suite: spliced\nnodes: !!load_from(nodes.d)\ntests: []\n";
        let suite = Suite::parse(doc, dir.path(), "suite.yaml").unwrap();
        assert_eq!(suite.nodes.len(), 1);
        assert_eq!(suite.nodes[0].name, "api");
    }

    #[test]
    fn facts_are_parsed_per_node() {
        let doc = r#"
suite: facts
nodes:
  - name: api
    type: local
    facts:
      cores: nproc
      user: whoami
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        assert!(suite.has_facts());
        assert_eq!(suite.nodes[0].facts.len(), 2);
        assert_eq!(suite.nodes[0].facts.get("cores").map(String::as_str), Some("nproc"));
    }

    #[test]
    fn unknown_top_level_keys_are_tolerated() {
        let doc = "suite: lax\nfuture_section:\n  key: value\nnodes: []\n";
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        assert_eq!(suite.suite, "lax");
    }
}
