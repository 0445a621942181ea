//! Apt step: install packages, refreshing the index only when stale.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

const UPDATE_STAMP: &str = "/var/lib/apt/periodic/update-success-stamp";
const STALE_AFTER_HOURS: i64 = 24;

pub struct AptStep {
    title: String,
    node_name: String,
    node: Arc<dyn Node>,
    packages: Vec<String>,
}

impl AptStep {
    pub fn from_config(cfg: &StepConfig, node: Arc<dyn Node>) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            node,
            packages: bag.string_list("packages")?,
        })
    }

    /// The index is refreshed when the success stamp is missing,
    /// unparsable, or older than a day.
    async fn update_needed(&self) -> bool {
        let Ok(mut result) = self.node.execute(&format!("stat {UPDATE_STAMP}")).await else {
            return true;
        };
        if result.exit_code != 0 {
            return true;
        }
        let output = result.stdout.read_all();
        match parse_modify_time(&output) {
            Some(modified) => {
                let age = chrono::Utc::now().naive_utc() - modified;
                age > chrono::Duration::hours(STALE_AFTER_HOURS)
            }
            None => true,
        }
    }
}

/// Pull the modification timestamp out of `stat` output. The `Modify:`
/// line carries `YYYY-MM-DD HH:MM:SS.fraction +ZONE`; the fraction and
/// zone are ignored.
fn parse_modify_time(stat_output: &str) -> Option<NaiveDateTime> {
    let line = stat_output
        .lines()
        .find(|line| line.trim_start().starts_with("Modify:"))?;
    let mut parts = line.split_whitespace();
    parts.next(); // "Modify:"
    let date = parts.next()?;
    let time = parts.next()?;
    let time = time.split('.').next()?;
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").ok()
}

#[async_trait]
impl Step for AptStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        if self.update_needed().await {
            let mut result = match self.node.execute("sudo -n apt-get update").await {
                Ok(result) => result,
                Err(err) => {
                    handle.error();
                    return Err(err);
                }
            };
            if result.exit_code != 0 {
                handle.error();
                let stderr = result.stderr.read_all();
                return Err(HarnessError::execution(format!(
                    "apt-get update failed: {}",
                    stderr.trim()
                )));
            }
        }

        let command = format!("sudo -n apt-get install -y {}", self.packages.join(" "));
        let mut result = match self.node.execute(&command).await {
            Ok(result) => result,
            Err(err) => {
                handle.error();
                return Err(err);
            }
        };
        if result.exit_code != 0 {
            handle.error();
            let stderr = result.stderr.read_all();
            return Err(HarnessError::execution(format!(
                "apt-get install failed: {}",
                stderr.trim()
            )));
        }

        handle.complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use gauntlet_common::mock::MockNode;
    use gauntlet_common::ui::formatter::{Formatter, NullFormatter};
    use std::path::Path;

    fn apt_step(node: Arc<MockNode>) -> AptStep {
        let doc = r#"
setup:
  - name: packages
    node: api
    step:
      type: apt
      options:
        packages: [curl, jq]
"#;
        let cfg = Suite::parse(doc, Path::new("."), "suite.yaml")
            .unwrap()
            .setup
            .remove(0);
        AptStep::from_config(&cfg, node).unwrap()
    }

    #[test]
    fn modify_line_parses_with_fraction_and_zone() {
        let output = "  File: /var/lib/apt/periodic/update-success-stamp\nModify: 2026-07-01 10:30:00.123456789 +0000\n";
        let parsed = parse_modify_time(output).unwrap();
        assert_eq!(parsed.to_string(), "2026-07-01 10:30:00");
    }

    #[test]
    fn garbage_stat_output_is_unparsable() {
        assert!(parse_modify_time("no such line").is_none());
        assert!(parse_modify_time("Modify: yesterday-ish").is_none());
    }

    #[tokio::test]
    async fn fresh_stamp_skips_the_update() {
        let node = Arc::new(MockNode::new());
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        node.respond(
            &format!("stat {UPDATE_STAMP}"),
            0,
            &format!("Modify: {now}.000000000 +0000\n"),
            "",
        );
        node.respond("sudo -n apt-get install -y curl jq", 0, "", "");

        let step = apt_step(node.clone());
        let handle = NullFormatter.start_task("packages", "running");
        step.run(handle.as_ref()).await.unwrap();

        let commands = node.executed_commands();
        assert!(!commands.iter().any(|c| c.contains("apt-get update")));
        assert!(commands.iter().any(|c| c.contains("apt-get install")));
    }

    #[tokio::test]
    async fn stale_stamp_forces_an_update_first() {
        let node = Arc::new(MockNode::new());
        node.respond(
            &format!("stat {UPDATE_STAMP}"),
            0,
            "Modify: 2020-01-01 00:00:00.000000000 +0000\n",
            "",
        );
        node.respond("sudo -n apt-get update", 0, "", "");
        node.respond("sudo -n apt-get install -y curl jq", 0, "", "");

        let step = apt_step(node.clone());
        let handle = NullFormatter.start_task("packages", "running");
        step.run(handle.as_ref()).await.unwrap();

        let commands = node.executed_commands();
        assert!(commands.iter().any(|c| c == "sudo -n apt-get update"));
    }

    #[tokio::test]
    async fn missing_stamp_forces_an_update() {
        let node = Arc::new(MockNode::new());
        node.respond(&format!("stat {UPDATE_STAMP}"), 1, "", "stat: cannot stat\n");
        node.respond("sudo -n apt-get update", 0, "", "");
        node.respond("sudo -n apt-get install -y curl jq", 0, "", "");

        let step = apt_step(node.clone());
        let handle = NullFormatter.start_task("packages", "running");
        step.run(handle.as_ref()).await.unwrap();
        assert!(node
            .executed_commands()
            .iter()
            .any(|c| c == "sudo -n apt-get update"));
    }

    #[tokio::test]
    async fn install_failure_fails_the_step() {
        let node = Arc::new(MockNode::new());
        node.respond(&format!("stat {UPDATE_STAMP}"), 1, "", "");
        node.respond("sudo -n apt-get update", 0, "", "");
        node.respond(
            "sudo -n apt-get install -y curl jq",
            100,
            "",
            "E: Unable to locate package\n",
        );

        let step = apt_step(node.clone());
        let handle = NullFormatter.start_task("packages", "running");
        let err = step.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("apt-get install failed"));
    }
}
