//! The suite lifecycle controller.
//!
//! Forward order: platforms up, nodes up (parallel, with a barrier), fact
//! gathering and template rendering, step/test construction, setup steps
//! (grouped by node), tests (strictly sequential), teardown steps, node
//! teardown, platform teardown in reverse. Two append-only tracking lists
//! record which nodes and platforms completed setup; if anything aborts
//! early, the deferred cleanup tears down exactly that prefix, once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use gauntlet_common::config::{StepConfig, Suite, TestConfig};
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::eval::{EvalDetails, EvalResult};
use gauntlet_common::facts;
use gauntlet_common::node::Node;
use gauntlet_common::ui::formatter::Formatter;

use crate::platform::PlatformManager;
use crate::prompt::{ErrorDecision, Prompter};
use crate::steps::{create_steps, Step};
use crate::testcases::{create_tests, TestCase};

/// Behavior switches, straight from the CLI flags.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Print passing evaluations too.
    pub verbose: bool,
    /// Abort on the first failing test check.
    pub stop_on_error: bool,
    /// Prompt continue/retry/quit on setup failures; pause after failed
    /// checks.
    pub pause_on_error: bool,
    /// Stop after setup steps and leave the environment up.
    pub setup_only: bool,
    /// Skip setup and tests; only run the teardown path.
    pub teardown_only: bool,
}

/// Final counters for one controller run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    /// Tests with no evaluators: they ran, but count as neither pass nor
    /// fail.
    pub ran: usize,
}

/// Resources whose setup completed and therefore require rollback, plus
/// the sentinel that suppresses the deferred cleanup after a normal
/// teardown.
#[derive(Default)]
struct CleanupTracker {
    nodes: Vec<String>,
    platforms: Vec<usize>,
    cleanup_complete: bool,
}

pub struct Controller {
    suite: Suite,
    platforms: Vec<Arc<dyn PlatformManager>>,
    nodes: HashMap<String, Arc<dyn Node>>,
    formatter: Arc<dyn Formatter>,
    prompter: Arc<dyn Prompter>,
    options: ControllerOptions,
}

impl Controller {
    pub fn new(
        suite: Suite,
        platforms: Vec<Arc<dyn PlatformManager>>,
        nodes: HashMap<String, Arc<dyn Node>>,
        formatter: Arc<dyn Formatter>,
        prompter: Arc<dyn Prompter>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            suite,
            platforms,
            nodes,
            formatter,
            prompter,
            options,
        }
    }

    /// Drive one full lifecycle. Re-runnable: each call starts with fresh
    /// tracking state, so `--iterations` simply calls this in a loop.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut tracker = CleanupTracker::default();
        let outcome = self.run_inner(&mut tracker).await;

        if !tracker.cleanup_complete {
            let header = if self.options.teardown_only {
                "Running teardown only"
            } else {
                "cleaning up after error"
            };
            let cleanup_failed = self.cleanup(&tracker, header).await;
            if self.options.teardown_only && outcome.is_ok() {
                if cleanup_failed {
                    return Err(HarnessError::Teardown {
                        unit: "suite".to_string(),
                        detail: "teardown finished with errors".to_string(),
                    });
                }
                return outcome;
            }
        }

        outcome
    }

    /// Release long-lived handles on every node. Called once, after all
    /// iterations.
    pub async fn close(&self) {
        for (name, node) in &self.nodes {
            if let Err(err) = node.close().await {
                tracing::warn!(node = %name, %err, "close failed");
            }
        }
    }

    async fn run_inner(&self, tracker: &mut CleanupTracker) -> Result<RunSummary> {
        self.set_column_widths();

        if self.options.teardown_only {
            // Everything is presumed up from a previous --setup-only run;
            // the deferred cleanup does the actual work.
            tracker.nodes = self.suite.nodes.iter().map(|n| n.name.clone()).collect();
            tracker.platforms = self
                .platforms
                .iter()
                .enumerate()
                .filter(|(_, p)| p.configured())
                .map(|(idx, _)| idx)
                .collect();
            return Ok(RunSummary::default());
        }

        self.formatter.print_header("Running test setup");
        self.platforms_up(tracker).await?;
        self.nodes_up(tracker).await?;

        let (setup_cfgs, teardown_cfgs, test_cfgs) = self.rendered_configs().await?;

        let setup_steps = create_steps(&setup_cfgs, &self.nodes)?;
        let teardown_steps = create_steps(&teardown_cfgs, &self.nodes)?;
        let tests = create_tests(&test_cfgs, &self.nodes)?;

        if !setup_steps.is_empty() {
            self.run_step_phase(&setup_steps, true).await?;
            self.formatter.print_empty();
        }

        if self.options.setup_only {
            tracker.cleanup_complete = true;
            return Ok(RunSummary::default());
        }

        let results = self.run_tests(&tests).await?;
        self.formatter.print_empty();

        let teardown_failed = self.run_teardown(tracker, &teardown_steps).await;
        tracker.cleanup_complete = true;
        self.formatter.print_empty();

        let summary = summarize(&results);
        self.formatter
            .print_results(summary.passed, summary.failed, summary.ran);

        if teardown_failed {
            return Err(HarnessError::Teardown {
                unit: "suite".to_string(),
                detail: "teardown finished with errors".to_string(),
            });
        }
        Ok(summary)
    }

    /// Column widths cover every task line the run can print, so the
    /// completion words align.
    fn set_column_widths(&self) {
        let mut task_width = 0usize;
        for node in &self.suite.nodes {
            task_width = task_width
                .max(format!("running setup on {}", node.name).len())
                .max(format!("running teardown on {}", node.name).len());
        }
        for platform in &self.platforms {
            task_width = task_width.max(format!("setting up {} platform", platform.name()).len());
        }
        for step in self.suite.setup.iter().chain(self.suite.teardown.iter()) {
            task_width = task_width.max(step.name.len());
        }
        self.formatter.set_task_column_width(task_width);

        let test_width = self
            .suite
            .tests
            .iter()
            .map(|t| t.name.len())
            .max()
            .unwrap_or(0);
        self.formatter.set_test_column_width(test_width);
    }

    async fn platforms_up(&self, tracker: &mut CleanupTracker) -> Result<()> {
        for (idx, platform) in self.platforms.iter().enumerate() {
            if !platform.configured() {
                continue;
            }
            let title = format!("setting up {} platform", platform.name());
            loop {
                let task = self.formatter.start_task(&title, "running");
                match platform.setup().await {
                    Ok(()) => {
                        task.complete();
                        tracker.platforms.push(idx);
                        break;
                    }
                    Err(err) => {
                        task.error();
                        self.formatter.print_error(&err.to_string());
                        match self.decide(&title).await {
                            ErrorDecision::Retry => continue,
                            ErrorDecision::Continue => break,
                            ErrorDecision::Quit => {
                                return Err(HarnessError::PlatformSetup {
                                    platform: platform.name().to_string(),
                                    source: Box::new(err),
                                })
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// One worker per node, with a barrier: the phase completes only when
    /// every node has finished, success or not. Failures are then walked
    /// through the interactive policy in declaration order.
    async fn nodes_up(&self, tracker: &mut CleanupTracker) -> Result<()> {
        let mut workers: JoinSet<(String, Result<()>)> = JoinSet::new();
        for (name, node) in &self.nodes {
            let name = name.clone();
            let node = Arc::clone(node);
            workers.spawn(async move {
                let outcome = node.setup().await;
                (name, outcome)
            });
        }

        let mut outcomes: HashMap<String, Result<()>> = HashMap::new();
        while let Some(joined) = workers.join_next().await {
            let (name, outcome) = joined
                .map_err(|err| HarnessError::internal(format!("node setup worker died: {err}")))?;
            outcomes.insert(name, outcome);
        }

        for cfg in &self.suite.nodes {
            let name = &cfg.name;
            let title = format!("running setup on {name}");
            let mut outcome = outcomes
                .remove(name)
                .unwrap_or_else(|| Err(HarnessError::internal(format!("node {name} never ran"))));

            loop {
                let task = self.formatter.start_task(&title, "running");
                match outcome {
                    Ok(()) => {
                        task.complete();
                        tracker.nodes.push(name.clone());
                        break;
                    }
                    Err(err) => {
                        task.error();
                        self.formatter.print_error(&err.to_string());
                        match self.decide(&title).await {
                            ErrorDecision::Retry => {
                                let node = Arc::clone(&self.nodes[name]);
                                outcome = node.setup().await;
                                continue;
                            }
                            ErrorDecision::Continue => break,
                            ErrorDecision::Quit => {
                                return Err(HarnessError::NodeSetup {
                                    node: name.clone(),
                                    source: Box::new(err),
                                })
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Gather facts and render every templated string before any step or
    /// test value is constructed.
    async fn rendered_configs(
        &self,
    ) -> Result<(Vec<StepConfig>, Vec<StepConfig>, Vec<TestConfig>)> {
        let mut setup = self.suite.setup.clone();
        let mut teardown = self.suite.teardown.clone();
        let mut tests = self.suite.tests.clone();

        if self.suite.has_facts() {
            let task = self.formatter.start_task("gathering facts", "running");
            let store = match facts::gather(&self.nodes, &self.suite.nodes).await {
                Ok(store) => {
                    task.complete();
                    store
                }
                Err(err) => {
                    task.error();
                    return Err(err);
                }
            };
            facts::render_step_configs(&mut setup, &store)?;
            facts::render_step_configs(&mut teardown, &store)?;
            facts::render_test_configs(&mut tests, &store)?;
        }

        Ok((setup, teardown, tests))
    }

    /// Run steps grouped by target node: groups in parallel, steps within
    /// a group in declared order. With `fail_fast`, a failure routes
    /// through the interactive policy; otherwise every remaining step
    /// still runs and errors are only collected.
    async fn run_step_phase(&self, steps: &[Arc<dyn Step>], fail_fast: bool) -> Result<bool> {
        let groups = group_by_node(steps);

        let mut workers: JoinSet<(Vec<Arc<dyn Step>>, usize, Option<HarnessError>)> =
            JoinSet::new();
        for group in groups {
            let formatter = Arc::clone(&self.formatter);
            workers.spawn(async move {
                let mut first_error = None;
                let mut failed_at = group.len();
                for (idx, step) in group.iter().enumerate() {
                    let handle = formatter.start_task(step.title(), "running");
                    match step.run(handle.as_ref()).await {
                        Ok(()) => {}
                        Err(err) => {
                            formatter.print_error(&err.to_string());
                            if fail_fast {
                                failed_at = idx;
                                first_error = Some(err);
                                break;
                            }
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                        }
                    }
                }
                (group, failed_at, first_error)
            });
        }

        let mut stalled_groups = Vec::new();
        let mut any_error = false;
        while let Some(joined) = workers.join_next().await {
            let (group, failed_at, error) = joined
                .map_err(|err| HarnessError::internal(format!("step worker died: {err}")))?;
            if let Some(err) = error {
                any_error = true;
                if fail_fast {
                    stalled_groups.push((group, failed_at, err));
                }
            }
        }

        // Walk stalled groups through the interactive policy, resuming
        // each from its failed step.
        for (group, mut idx, mut err) in stalled_groups {
            loop {
                match self.decide(group[idx].title()).await {
                    ErrorDecision::Quit => {
                        return Err(HarnessError::Step {
                            step: group[idx].title().to_string(),
                            source: Box::new(err),
                        })
                    }
                    ErrorDecision::Retry => {}
                    ErrorDecision::Continue => {
                        idx += 1;
                    }
                }

                while idx < group.len() {
                    let handle = self.formatter.start_task(group[idx].title(), "running");
                    match group[idx].run(handle.as_ref()).await {
                        Ok(()) => idx += 1,
                        Err(step_err) => {
                            self.formatter.print_error(&step_err.to_string());
                            err = step_err;
                            break;
                        }
                    }
                }
                if idx >= group.len() {
                    break;
                }
            }
        }

        Ok(any_error)
    }

    async fn run_tests(
        &self,
        tests: &[Arc<dyn TestCase>],
    ) -> Result<Vec<HashMap<String, EvalResult>>> {
        self.formatter.print_header("Running tests");

        let mut all_results = Vec::with_capacity(tests.len());
        for (idx, test) in tests.iter().enumerate() {
            let id = (idx + 1).to_string();
            let handle = self.formatter.start_test(&id, test.name());
            let results = match test.run(handle.as_ref()).await {
                Ok(results) => results,
                Err(err) => {
                    self.formatter
                        .print_fail(test.name(), &EvalDetails::Text(err.to_string()));
                    if self.options.pause_on_error {
                        self.prompter.wait_enter().await;
                    }
                    return Err(err);
                }
            };

            let mut names: Vec<&String> = results.keys().collect();
            names.sort();
            for name in names {
                let result = &results[name];
                if result.passed && self.options.verbose {
                    self.formatter.print_pass(name, &result.details);
                } else if !result.passed {
                    self.formatter.print_fail(name, &result.details);
                    if self.options.stop_on_error {
                        return Err(HarnessError::execution(format!(
                            "test {} failed",
                            test.name()
                        )));
                    }
                    if self.options.pause_on_error {
                        self.prompter.wait_enter().await;
                    }
                }
            }

            all_results.push(results);
        }

        Ok(all_results)
    }

    /// The normal teardown path. Errors never abort the remaining
    /// teardowns; they only force a non-zero exit.
    async fn run_teardown(
        &self,
        tracker: &CleanupTracker,
        teardown_steps: &[Arc<dyn Step>],
    ) -> bool {
        let mut failed = false;

        self.formatter.print_header("Running test teardown");
        if !teardown_steps.is_empty() {
            match self.run_step_phase(teardown_steps, false).await {
                Ok(step_failures) => failed |= step_failures,
                Err(_) => failed = true,
            }
        }

        for name in &tracker.nodes {
            let task = self
                .formatter
                .start_task(&format!("running teardown on {name}"), "running");
            match self.nodes[name].teardown().await {
                Ok(()) => task.complete(),
                Err(err) => {
                    task.error();
                    self.formatter.print_error(&err.to_string());
                    failed = true;
                }
            }
        }

        for idx in tracker.platforms.iter().rev() {
            let platform = &self.platforms[*idx];
            let task = self.formatter.start_task(
                &format!("tearing down {} platform", platform.name()),
                "running",
            );
            match platform.teardown().await {
                Ok(()) => task.complete(),
                Err(err) => {
                    task.error();
                    self.formatter.print_error(&err.to_string());
                    failed = true;
                }
            }
        }

        failed
    }

    /// Deferred cleanup: tears down exactly the tracked prefix, nodes
    /// first, then platforms in strict reverse order. Errors are reported
    /// and swallowed so every remaining resource still gets a chance.
    async fn cleanup(&self, tracker: &CleanupTracker, header: &str) -> bool {
        self.formatter.print_header(header);
        let mut failed = false;

        for name in &tracker.nodes {
            let task = self
                .formatter
                .start_task(&format!("running teardown on {name}"), "running");
            match self.nodes[name].teardown().await {
                Ok(()) => task.complete(),
                Err(err) => {
                    task.error();
                    self.formatter.print_error(&err.to_string());
                    failed = true;
                }
            }
        }

        for idx in tracker.platforms.iter().rev() {
            let platform = &self.platforms[*idx];
            let task = self.formatter.start_task(
                &format!("tearing down {} platform", platform.name()),
                "running",
            );
            match platform.teardown().await {
                Ok(()) => task.complete(),
                Err(err) => {
                    task.error();
                    self.formatter.print_error(&err.to_string());
                    failed = true;
                }
            }
        }

        failed
    }

    async fn decide(&self, what: &str) -> ErrorDecision {
        if !self.options.pause_on_error {
            return ErrorDecision::Quit;
        }
        self.prompter.on_error(what).await
    }
}

/// Group steps by target node, preserving declared order within each
/// group. Group order follows first appearance.
fn group_by_node(steps: &[Arc<dyn Step>]) -> Vec<Vec<Arc<dyn Step>>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Arc<dyn Step>>> = HashMap::new();
    for step in steps {
        let key = step.node_name().to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(Arc::clone(step));
    }
    order
        .into_iter()
        .map(|key| groups.remove(&key).unwrap_or_default())
        .collect()
}

fn summarize(results: &[HashMap<String, EvalResult>]) -> RunSummary {
    let mut summary = RunSummary::default();
    for test in results {
        if test.is_empty() {
            summary.ran += 1;
            continue;
        }
        if test.values().all(|r| r.passed) {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gauntlet_common::ui::formatter::TaskHandle;
    use std::sync::Mutex;

    struct NamedStep {
        title: String,
        node: String,
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Step for NamedStep {
        fn title(&self) -> &str {
            &self.title
        }

        fn node_name(&self) -> &str {
            &self.node
        }

        async fn run(&self, _handle: &dyn TaskHandle) -> Result<()> {
            // Yield so interleaving across groups actually happens.
            tokio::task::yield_now().await;
            self.journal.lock().unwrap().push(self.title.clone());
            Ok(())
        }
    }

    #[test]
    fn grouping_preserves_declared_order_within_a_node() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let step = |title: &str, node: &str| -> Arc<dyn Step> {
            Arc::new(NamedStep {
                title: title.into(),
                node: node.into(),
                journal: Arc::clone(&journal),
            })
        };
        let steps = vec![
            step("a1", "a"),
            step("b1", "b"),
            step("a2", "a"),
            step("b2", "b"),
        ];
        let groups = group_by_node(&steps);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].title(), "a1");
        assert_eq!(groups[0][1].title(), "a2");
        assert_eq!(groups[1][0].title(), "b1");
        assert_eq!(groups[1][1].title(), "b2");
    }

    #[test]
    fn summaries_count_tests_not_checks() {
        let passing = EvalResult {
            passed: true,
            details: EvalDetails::None,
        };
        let failing = EvalResult {
            passed: false,
            details: EvalDetails::None,
        };

        let results = vec![
            HashMap::from([("a".to_string(), passing.clone()), ("b".to_string(), passing.clone())]),
            HashMap::from([("a".to_string(), passing), ("b".to_string(), failing)]),
            HashMap::new(),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ran, 1);
    }
}
