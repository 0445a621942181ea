//! Interactive error policy prompts.

use async_trait::async_trait;

/// Operator decision after a setup-phase failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Treat the failed unit as skipped and move on. The unit is not
    /// tracked, so it will not be torn down.
    Continue,
    /// Re-attempt the same operation in place.
    Retry,
    /// Abort; the deferred cleanup runs.
    Quit,
}

/// Source of operator decisions. The controller consults it on setup
/// failures and after failed test checks.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn on_error(&self, what: &str) -> ErrorDecision;
    /// Block on an "enter to continue" acknowledgment.
    async fn wait_enter(&self);
}

/// Non-interactive policy: every failure aborts.
pub struct AutoQuit;

#[async_trait]
impl Prompter for AutoQuit {
    async fn on_error(&self, _what: &str) -> ErrorDecision {
        ErrorDecision::Quit
    }

    async fn wait_enter(&self) {}
}

/// Reads decisions from stdin.
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_line() -> String {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line.trim().to_lowercase()
    }
}

#[async_trait]
impl Prompter for StdinPrompter {
    async fn on_error(&self, what: &str) -> ErrorDecision {
        println!("{what} failed. [c]ontinue / [r]etry / [q]uit?");
        loop {
            let answer = tokio::task::spawn_blocking(Self::read_line)
                .await
                .unwrap_or_default();
            match answer.as_str() {
                "c" | "continue" => return ErrorDecision::Continue,
                "r" | "retry" => return ErrorDecision::Retry,
                "q" | "quit" | "" => return ErrorDecision::Quit,
                _ => println!("please answer c, r or q"),
            }
        }
    }

    async fn wait_enter(&self) {
        println!("Press enter to continue");
        let _ = tokio::task::spawn_blocking(Self::read_line).await;
    }
}

/// Scripted prompter for tests: pops decisions front to back, quitting
/// once the script runs dry.
#[derive(Default)]
pub struct ScriptedPrompter {
    decisions: std::sync::Mutex<std::collections::VecDeque<ErrorDecision>>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(decisions: impl IntoIterator<Item = ErrorDecision>) -> Self {
        Self {
            decisions: std::sync::Mutex::new(decisions.into_iter().collect()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn on_error(&self, what: &str) -> ErrorDecision {
        self.prompts.lock().unwrap().push(what.to_string());
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ErrorDecision::Quit)
    }

    async fn wait_enter(&self) {}
}
