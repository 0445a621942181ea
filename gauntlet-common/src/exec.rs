//! Execution results and per-call execution options.

use std::collections::HashMap;

use serde::Deserialize;

/// Captured output of a single command execution.
///
/// The stdout/stderr streams are one-shot: an evaluator (or any other
/// consumer) drains the bytes at most once. Callers that need the payload
/// more than once must keep the string they read.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Opaque identifier for correlating log lines with an execution.
    pub execution_id: String,
    pub exit_code: i32,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            exit_code,
            stdout: OutputStream::new(stdout),
            stderr: OutputStream::new(stderr),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A single-pass reader over captured command output.
///
/// `read_all` hands out the buffered bytes exactly once; subsequent calls
/// return an empty string.
#[derive(Debug, Default)]
pub struct OutputStream {
    buf: Option<Vec<u8>>,
}

impl OutputStream {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf: Some(buf) }
    }

    /// Drain the captured bytes as a lossy UTF-8 string.
    pub fn read_all(&mut self) -> String {
        match self.buf.take() {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => String::new(),
        }
    }

    /// True once the stream has been drained.
    pub fn consumed(&self) -> bool {
        self.buf.is_none()
    }
}

/// Sudo password supply for a node.
///
/// The password is written to the spawned command's stdin followed by a
/// newline so that `sudo -S` invocations inside the command can consume it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SudoConfig {
    /// Inline password.
    #[serde(default)]
    pub password: Option<String>,
    /// Name of a process environment variable read at call time.
    #[serde(default)]
    pub env_var: Option<String>,
}

impl SudoConfig {
    /// Resolve the password at call time.
    pub fn resolve(&self) -> Option<String> {
        if let Some(pass) = &self.password {
            return Some(pass.clone());
        }
        if let Some(var) = &self.env_var {
            return std::env::var(var).ok();
        }
        None
    }
}

/// Per-execution options, layered over a node's defaults.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Extra environment variables for the spawned command.
    pub env: HashMap<String, String>,
    /// Override shell for variants that spawn one (default `/bin/sh`).
    pub shell: Option<String>,
    /// Sudo password injection.
    pub sudo: Option<SudoConfig>,
}

impl ExecOptions {
    /// Build execution options from a node's option bag. Unrelated keys are
    /// left for the node variant itself to interpret.
    pub fn from_option_bag(bag: &serde_json::Value) -> Self {
        let mut opts = Self::default();
        let Some(map) = bag.as_object() else {
            return opts;
        };
        if let Some(env) = map.get("env").and_then(|v| v.as_object()) {
            for (k, v) in env {
                if let Some(s) = v.as_str() {
                    opts.env.insert(k.clone(), s.to_string());
                }
            }
        }
        if let Some(shell) = map.get("shell").and_then(|v| v.as_str()) {
            opts.shell = Some(shell.to_string());
        }
        if let Some(sudo) = map.get("sudo") {
            opts.sudo = serde_json::from_value(sudo.clone()).ok();
        }
        opts
    }

    /// Layer per-call options over node defaults. Call-site values win;
    /// environments are merged.
    pub fn layered(defaults: &ExecOptions, call: &ExecOptions) -> ExecOptions {
        let mut env = defaults.env.clone();
        env.extend(call.env.clone());
        ExecOptions {
            env,
            shell: call.shell.clone().or_else(|| defaults.shell.clone()),
            sudo: call.sudo.clone().or_else(|| defaults.sudo.clone()),
        }
    }
}
