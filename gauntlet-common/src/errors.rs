//! Harness error taxonomy and configuration diagnostics.
//!
//! Configuration errors carry the source location of the offending YAML so
//! the CLI can render a highlighted snippet before any resource exists.
//! Lifecycle errors are tagged by the phase that produced them; the
//! controller routes them through the interactive pause-on-error policy or
//! into the deferred cleanup.

use std::fmt;

use crossterm::style::Stylize;
use thiserror::Error;

/// A position inside a loaded configuration file. Line and column are
/// 1-based; zero means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn is_known(&self) -> bool {
        !self.file.is_empty() && self.line > 0
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A malformed-configuration error tied to a location in the suite file.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub message: String,
    pub location: SourceLocation,
    /// Human key path, e.g. `tests[2].node`.
    pub key_path: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
            key_path: String::new(),
        }
    }

    pub fn with_key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = key_path.into();
        self
    }

    /// Render the error with a snippet of the offending file: three lines of
    /// context above, two below, the target line highlighted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push('\n');
        if self.key_path.is_empty() {
            out.push_str(&format!("{}\n", format!("Error: {}", self.message).red().bold()));
        } else {
            out.push_str(&format!(
                "{}\n",
                format!("Error: {} ({})", self.message, self.key_path).red().bold()
            ));
        }

        if !self.location.is_known() {
            out.push('\n');
            return out;
        }

        let Ok(data) = std::fs::read_to_string(&self.location.file) else {
            out.push_str(&format!(
                "\n  {}:{}\n\n",
                self.location.file, self.location.line
            ));
            return out;
        };

        let lines: Vec<&str> = data.split('\n').collect();
        let target = self.location.line;
        let start = target.saturating_sub(3).max(1);
        let end = (target + 2).min(lines.len());
        let gutter = end.to_string().len();

        out.push('\n');
        out.push_str(&format!("  {}\n\n", self.location.file.as_str().cyan()));

        let separator = "\u{2500}".repeat(37);
        out.push_str(&format!("  {}\n", separator.as_str().dim()));
        for line_num in start..=end {
            let content = lines.get(line_num - 1).copied().unwrap_or("");
            let num = format!("{:>width$}", line_num, width = gutter);
            if line_num == target {
                out.push_str(&format!(
                    "{}\n",
                    format!("  > {num} | {content}").red()
                ));
            } else {
                out.push_str(&format!("    {num} | {content}\n"));
            }
        }
        out.push_str(&format!("  {}\n\n", separator.as_str().dim()));
        out
    }
}

/// Runtime failures during the suite lifecycle.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("platform {platform} setup failed: {source}")]
    PlatformSetup {
        platform: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("node {node} setup failed: {source}")]
    NodeSetup {
        node: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("post-command on {test} failed: {detail}")]
    PostCommand { test: String, detail: String },

    #[error("teardown of {unit} failed: {detail}")]
    Teardown { unit: String, detail: String },

    #[error("timeout waiting for {what}")]
    ReadinessTimeout { what: String },

    #[error("{0}")]
    Execution(String),

    #[error("fact {fact} on node {node} failed: {detail}")]
    Fact {
        node: String,
        fact: String,
        detail: String,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
