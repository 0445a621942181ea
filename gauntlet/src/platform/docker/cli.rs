//! Thin plumbing over the `docker` CLI.

use tokio::process::Command;

use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};

use crate::platform::host;

/// Create a bridge network with an optional subnet and gateway.
pub async fn create_network(name: &str, subnet: &str, gateway: &str) -> Result<String> {
    let mut args = vec!["network", "create"];
    if !subnet.is_empty() {
        args.extend(["--subnet", subnet]);
    }
    if !gateway.is_empty() {
        args.extend(["--gateway", gateway]);
    }
    args.push(name);
    host::run_checked("docker", &args).await
}

pub async fn remove_network(name: &str) -> Result<()> {
    host::run_checked("docker", &["network", "rm", name]).await?;
    Ok(())
}

/// Build an image from a Dockerfile, tagging it `name:tag`.
pub async fn build_image(name: &str, tag: &str, dockerfile: &str) -> Result<()> {
    let path = std::path::Path::new(dockerfile);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| HarnessError::execution(format!("invalid dockerfile path: {dockerfile}")))?;

    let reference = if tag.is_empty() {
        name.to_string()
    } else {
        format!("{name}:{tag}")
    };

    let mut command = Command::new("docker");
    command
        .args(["build", "-t", reference.as_str(), "-f", file, "."])
        .current_dir(dir);
    let mut result = host::capture(command, "docker", None).await?;
    if result.exit_code != 0 {
        let stderr = result.stderr.read_all();
        return Err(HarnessError::execution(format!(
            "could not build image {reference}: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

pub async fn remove_image(name: &str) -> Result<()> {
    host::run_checked("docker", &["rmi", name]).await?;
    Ok(())
}

pub async fn create_container(
    name: &str,
    hostname: &str,
    image: &str,
    privileged: bool,
) -> Result<()> {
    let mut args = vec!["create", "--name", name, "--hostname", hostname];
    if privileged {
        args.push("--privileged");
    }
    args.push(image);
    host::run_checked("docker", &args).await?;
    Ok(())
}

pub async fn start_container(name: &str) -> Result<()> {
    host::run_checked("docker", &["start", name]).await?;
    Ok(())
}

pub async fn stop_container(name: &str) -> Result<()> {
    host::run_checked("docker", &["stop", name]).await?;
    Ok(())
}

pub async fn remove_container(name: &str) -> Result<()> {
    host::run_checked("docker", &["rm", "-f", name]).await?;
    Ok(())
}

/// True when the container's state reports Running.
pub async fn container_running(name: &str) -> Result<bool> {
    let state =
        host::run_checked("docker", &["inspect", "-f", "{{.State.Running}}", name]).await?;
    Ok(state == "true")
}

/// Run a command inside a container with `/bin/sh -c` semantics.
pub async fn exec(
    container: &str,
    node_label: &str,
    command: &str,
    opts: &ExecOptions,
) -> Result<ExecutionResult> {
    let shell = opts.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());
    let stdin = opts.sudo.as_ref().and_then(|s| s.resolve());

    let mut cli = Command::new("docker");
    cli.arg("exec");
    if stdin.is_some() {
        cli.arg("-i");
    }
    for (key, value) in &opts.env {
        cli.args(["-e", &format!("{key}={value}")]);
    }
    cli.args([container, shell.as_str(), "-c", command]);

    host::capture(cli, node_label, stdin).await
}
