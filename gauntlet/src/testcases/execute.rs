//! The execute test: pre-commands, one primary command, post-commands,
//! then evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gauntlet_common::config::TestConfig;
use gauntlet_common::errors::{ConfigError, HarnessError, Result};
use gauntlet_common::eval::{Contains, EvalResult, Evaluate, ExitCode, MatchOutput};
use gauntlet_common::exec::ExecutionResult;
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::TestHandle;

use super::TestCase;

#[derive(Debug)]
pub struct ExecuteTest {
    name: String,
    node: Arc<dyn Node>,
    command: String,
    pre_commands: Vec<String>,
    post_commands: Vec<String>,
    evaluations: Vec<(String, Box<dyn Evaluate>)>,
}

impl ExecuteTest {
    pub fn from_config(cfg: &TestConfig, node: Arc<dyn Node>) -> Result<Self> {
        let command = cfg
            .options
            .get("command")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ConfigError::new(
                    format!("command is required in test {:?}", cfg.name),
                    cfg.loc.clone(),
                )
            })?;

        let mut evaluations: Vec<(String, Box<dyn Evaluate>)> = Vec::new();
        if let Some(evaluate) = cfg.options.get("evaluate") {
            let map = evaluate.as_object().ok_or_else(|| {
                ConfigError::new(
                    format!("evaluate must be a mapping in test {:?}", cfg.name),
                    cfg.loc.clone(),
                )
            })?;
            for (key, value) in map {
                let evaluator: Box<dyn Evaluate> = match key.as_str() {
                    "exit_code" => {
                        let expected = value.as_i64().ok_or_else(|| {
                            ConfigError::new(
                                format!("exit_code must be an integer in test {:?}", cfg.name),
                                cfg.loc.clone(),
                            )
                        })?;
                        Box::new(ExitCode::new(expected as i32))
                    }
                    "match" => {
                        let expected = value.as_str().ok_or_else(|| {
                            ConfigError::new(
                                format!("match must be a string in test {:?}", cfg.name),
                                cfg.loc.clone(),
                            )
                        })?;
                        Box::new(MatchOutput::new(expected, true))
                    }
                    "contains" => {
                        let expected = value.as_str().ok_or_else(|| {
                            ConfigError::new(
                                format!("contains must be a string in test {:?}", cfg.name),
                                cfg.loc.clone(),
                            )
                        })?;
                        Box::new(Contains::new(expected))
                    }
                    other => {
                        return Err(ConfigError::new(
                            format!("unknown evaluator {other:?} in test {:?}", cfg.name),
                            cfg.loc.clone(),
                        )
                        .into())
                    }
                };
                evaluations.push((key.clone(), evaluator));
            }
        }

        Ok(Self {
            name: cfg.name.clone(),
            node,
            command,
            pre_commands: cfg.setup.clone(),
            post_commands: cfg.teardown.clone(),
            evaluations,
        })
    }

    async fn run_command_list(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            let mut result = self.node.execute(command).await?;
            if result.exit_code != 0 {
                let stderr = result.stderr.read_all();
                return Err(HarnessError::execution(format!(
                    "command {command:?} exited with code {}: {}",
                    result.exit_code,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TestCase for ExecuteTest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, handle: &dyn TestHandle) -> Result<HashMap<String, EvalResult>> {
        handle.update("preparing");
        let pre_result = self.run_command_list(&self.pre_commands).await;

        // The primary command runs only when preparation succeeded, but
        // post-commands always run: they restore environment state.
        handle.update("running");
        let command_result = match &pre_result {
            Ok(()) => Some(self.node.execute(&self.command).await),
            Err(_) => None,
        };

        handle.update("cleanup");
        if let Err(err) = self.run_command_list(&self.post_commands).await {
            handle.error();
            return Err(HarnessError::PostCommand {
                test: self.name.clone(),
                detail: err.to_string(),
            });
        }

        if let Err(err) = pre_result {
            handle.error();
            return Err(err);
        }

        let mut execution = match command_result {
            Some(Ok(execution)) => execution,
            Some(Err(err)) => {
                handle.error();
                return Err(err);
            }
            None => {
                handle.error();
                return Err(HarnessError::internal("test command never ran"));
            }
        };

        let mut results = HashMap::new();
        let mut passed = Vec::with_capacity(self.evaluations.len());
        for (name, evaluator) in &self.evaluations {
            let outcome = verify_once(evaluator.as_ref(), &mut execution);
            passed.push(outcome.passed);
            results.insert(name.clone(), outcome);
        }

        handle.complete(&passed);
        Ok(results)
    }
}

/// Evaluators each read the captured stdout at most once; replay the
/// captured bytes so several evaluators can look at the same output.
fn verify_once(evaluator: &dyn Evaluate, execution: &mut ExecutionResult) -> EvalResult {
    let stdout = execution.stdout.read_all();
    let mut replay = ExecutionResult::new(
        execution.exit_code,
        stdout.clone().into_bytes(),
        Vec::new(),
    );
    // Keep the bytes around for the next evaluator.
    execution.stdout = gauntlet_common::exec::OutputStream::new(stdout.into_bytes());
    evaluator.verify(&mut replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;
    use gauntlet_common::mock::MockNode;
    use gauntlet_common::ui::formatter::{Formatter, NullFormatter};
    use std::path::Path;

    fn parse_test(doc: &str) -> TestConfig {
        Suite::parse(doc, Path::new("."), "suite.yaml")
            .unwrap()
            .tests
            .remove(0)
    }

    const BASIC: &str = r#"
tests:
  - name: echo check
    node: api
    type: execute
    setup: ["prep one", "prep two"]
    teardown: ["cleanup"]
    options:
      command: echo hello
      evaluate:
        exit_code: 0
        match: hello
"#;

    #[tokio::test]
    async fn happy_path_runs_everything_in_order() {
        let node = Arc::new(MockNode::permissive());
        node.respond("echo hello", 0, "hello\n", "");
        let test = ExecuteTest::from_config(&parse_test(BASIC), node.clone()).unwrap();
        let handle = NullFormatter.start_test("1", "echo check");

        let results = test.run(handle.as_ref()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.passed));
        assert_eq!(
            node.executed_commands(),
            vec!["prep one", "prep two", "echo hello", "cleanup"]
        );
    }

    #[tokio::test]
    async fn pre_command_failure_skips_the_command_but_not_the_cleanup() {
        let node = Arc::new(MockNode::permissive());
        node.respond("prep one", 1, "", "boom\n");
        let test = ExecuteTest::from_config(&parse_test(BASIC), node.clone()).unwrap();
        let handle = NullFormatter.start_test("1", "echo check");

        let err = test.run(handle.as_ref()).await.unwrap_err();
        assert!(err.to_string().contains("prep one"));
        let commands = node.executed_commands();
        assert!(!commands.contains(&"echo hello".to_string()));
        assert!(commands.contains(&"cleanup".to_string()));
    }

    #[tokio::test]
    async fn post_command_failure_is_fatal_even_after_success() {
        let node = Arc::new(MockNode::permissive());
        node.respond("echo hello", 0, "hello\n", "");
        node.respond("cleanup", 1, "", "stuck\n");
        let test = ExecuteTest::from_config(&parse_test(BASIC), node.clone()).unwrap();
        let handle = NullFormatter.start_test("1", "echo check");

        let err = test.run(handle.as_ref()).await.unwrap_err();
        assert!(matches!(err, HarnessError::PostCommand { .. }));
    }

    #[tokio::test]
    async fn multiple_evaluators_see_the_same_output() {
        let doc = r#"
tests:
  - name: multi
    node: api
    type: execute
    options:
      command: emit
      evaluate:
        match: hello world
        contains: lo wo
        exit_code: 0
"#;
        let node = Arc::new(MockNode::new());
        node.respond("emit", 0, "hello world\n", "");
        let test = ExecuteTest::from_config(&parse_test(doc), node).unwrap();
        let handle = NullFormatter.start_test("1", "multi");

        let results = test.run(handle.as_ref()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.passed), "{results:?}");
    }

    #[tokio::test]
    async fn zero_evaluators_yield_an_empty_result_map() {
        let doc = r#"
tests:
  - name: bare
    node: api
    type: execute
    options:
      command: "true"
"#;
        let node = Arc::new(MockNode::permissive());
        let test = ExecuteTest::from_config(&parse_test(doc), node).unwrap();
        let handle = NullFormatter.start_test("1", "bare");
        let results = test.run(handle.as_ref()).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn unknown_evaluator_keys_are_fatal() {
        let doc = r#"
tests:
  - name: odd
    node: api
    type: execute
    options:
      command: "true"
      evaluate:
        vibes: good
"#;
        let err =
            ExecuteTest::from_config(&parse_test(doc), Arc::new(MockNode::permissive())).unwrap_err();
        assert!(err.to_string().contains("unknown evaluator"));
    }

    #[test]
    fn command_is_required() {
        let doc = r#"
tests:
  - name: empty
    node: api
    type: execute
    options: {}
"#;
        let err =
            ExecuteTest::from_config(&parse_test(doc), Arc::new(MockNode::permissive())).unwrap_err();
        assert!(err.to_string().contains("command is required"));
    }
}
