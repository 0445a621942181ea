//! Host process execution shared by node variants and platform drivers.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::ExecutionResult;
use gauntlet_common::ui::{tee, StreamKind};

/// Spawn a command, feed it optional stdin, and capture both streams. In
/// debug mode the streams are mirrored line by line through the output
/// coordinator under `node`'s prefix.
pub async fn capture(mut command: Command, node: &str, stdin: Option<String>) -> Result<ExecutionResult> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = command
        .spawn()
        .map_err(|err| HarnessError::execution(format!("failed to spawn command: {err}")))?;

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(input.as_bytes())
                .await
                .map_err(|err| HarnessError::execution(format!("failed to write stdin: {err}")))?;
            handle
                .write_all(b"\n")
                .await
                .map_err(|err| HarnessError::execution(format!("failed to write stdin: {err}")))?;
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError::internal("child stdout not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| HarnessError::internal("child stderr not piped"))?;

    let (captured_out, captured_err, status) = tokio::join!(
        tee::capture_async(stdout, node, StreamKind::Stdout),
        tee::capture_async(stderr, node, StreamKind::Stderr),
        child.wait(),
    );

    let status = status
        .map_err(|err| HarnessError::execution(format!("failed to wait for command: {err}")))?;

    Ok(ExecutionResult::new(
        status.code().unwrap_or(-1),
        captured_out?,
        captured_err?,
    ))
}

/// Run a host command and fail unless it exits zero. Returns trimmed stdout.
pub async fn run_checked(program: &str, args: &[&str]) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args);
    let mut result = capture(command, program, None).await?;
    let stdout = result.stdout.read_all();
    if result.exit_code != 0 {
        let stderr = result.stderr.read_all();
        return Err(HarnessError::execution(format!(
            "{program} {} exited with code {}: {}",
            args.join(" "),
            result.exit_code,
            stderr.trim()
        )));
    }
    Ok(stdout.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_returns_exit_code_and_streams() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "echo out; echo err >&2; exit 3"]);
        let mut result = capture(command, "host", None).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.read_all(), "out\n");
        assert_eq!(result.stderr.read_all(), "err\n");
    }

    #[tokio::test]
    async fn capture_feeds_stdin() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "read line; echo got:$line"]);
        let mut result = capture(command, "host", Some("secret".into())).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.read_all(), "got:secret\n");
    }

    #[tokio::test]
    async fn run_checked_propagates_failure() {
        assert!(run_checked("/bin/sh", &["-c", "exit 1"]).await.is_err());
        let out = run_checked("/bin/sh", &["-c", "echo fine"]).await.unwrap();
        assert_eq!(out, "fine");
    }
}
