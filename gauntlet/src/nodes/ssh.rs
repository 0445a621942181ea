//! SSH node: a pooled client connection with one fresh session per
//! command.

use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::node::Node;
use gauntlet_common::ui::{tee, StreamKind};

use super::parse_options;

#[derive(Debug, Clone, Default, Deserialize)]
struct SshNodeOpts {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(default)]
    pass: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

struct SshInner {
    name: String,
    opts: SshNodeOpts,
    defaults: ExecOptions,
    session: Mutex<Option<ssh2::Session>>,
}

/// Holds one authenticated client; `execute` opens a fresh channel per
/// command and `close` tears the client down.
pub struct SshNode {
    inner: Arc<SshInner>,
}

impl SshNode {
    pub fn new(cfg: &NodeConfig) -> Result<Self> {
        let mut opts: SshNodeOpts = parse_options(cfg)?;
        if opts.port == 0 {
            opts.port = 22;
        }
        Ok(Self {
            inner: Arc::new(SshInner {
                name: cfg.name.clone(),
                opts,
                defaults: ExecOptions::from_option_bag(&cfg.options),
                session: Mutex::new(None),
            }),
        })
    }
}

impl SshInner {
    fn connect_blocking(&self) -> Result<()> {
        let addr = format!("{}:{}", self.opts.host, self.opts.port);
        let stream = TcpStream::connect(&addr)
            .map_err(|err| HarnessError::execution(format!("ssh connect to {addr} failed: {err}")))?;

        let mut session = ssh2::Session::new()
            .map_err(|err| HarnessError::execution(format!("ssh session init failed: {err}")))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|err| HarnessError::execution(format!("ssh handshake with {addr} failed: {err}")))?;

        // Host keys are not verified; suites target disposable machines.
        if let Some(key) = &self.opts.key {
            session
                .userauth_pubkey_file(&self.opts.user, None, Path::new(key), None)
                .map_err(|err| {
                    HarnessError::execution(format!("ssh key auth for {addr} failed: {err}"))
                })?;
        } else if let Some(pass) = &self.opts.pass {
            session
                .userauth_password(&self.opts.user, pass)
                .map_err(|err| {
                    HarnessError::execution(format!("ssh password auth for {addr} failed: {err}"))
                })?;
        }

        if !session.authenticated() {
            return Err(HarnessError::execution(format!(
                "ssh authentication for {addr} did not complete; supply key or pass"
            )));
        }

        *self.session.lock().unwrap() = Some(session);
        Ok(())
    }

    fn exec_blocking(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let opts = ExecOptions::layered(&self.defaults, opts);
        let guard = self.session.lock().unwrap();
        let session = guard
            .as_ref()
            .ok_or_else(|| HarnessError::execution("ssh session not established; setup not run"))?;

        let mut channel = session
            .channel_session()
            .map_err(|err| HarnessError::execution(format!("ssh channel open failed: {err}")))?;

        for (key, value) in &opts.env {
            // Servers commonly restrict AcceptEnv; a rejected variable is
            // not fatal.
            let _ = channel.setenv(key, value);
        }

        channel
            .exec(command)
            .map_err(|err| HarnessError::execution(format!("ssh exec failed: {err}")))?;

        if let Some(password) = opts.sudo.as_ref().and_then(|s| s.resolve()) {
            let _ = channel.write_all(password.as_bytes());
            let _ = channel.write_all(b"\n");
        }
        let _ = channel.send_eof();

        let stdout = tee::capture_sync(&mut channel, &self.name, StreamKind::Stdout)?;
        let stderr = tee::capture_sync(channel.stderr(), &self.name, StreamKind::Stderr)?;

        channel
            .wait_close()
            .map_err(|err| HarnessError::execution(format!("ssh channel close failed: {err}")))?;
        let exit_code = channel
            .exit_status()
            .map_err(|err| HarnessError::internal(format!("ssh exit status missing: {err}")))?;

        Ok(ExecutionResult::new(exit_code, stdout, stderr))
    }

    fn close_blocking(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            let _ = session.disconnect(None, "closing", None);
        }
    }
}

#[async_trait]
impl Node for SshNode {
    async fn setup(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.connect_blocking())
            .await
            .map_err(|err| HarnessError::internal(format!("ssh setup task failed: {err}")))?
    }

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let inner = Arc::clone(&self.inner);
        let command = command.to_string();
        let opts = opts.clone();
        tokio::task::spawn_blocking(move || inner.exec_blocking(&command, &opts))
            .await
            .map_err(|err| HarnessError::internal(format!("ssh exec task failed: {err}")))?
    }

    async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.close_blocking())
            .await
            .map_err(|err| HarnessError::internal(format!("ssh close task failed: {err}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_common::config::Suite;

    #[test]
    fn port_defaults_to_twenty_two() {
        let doc = r#"
nodes:
  - name: far
    type: ssh
    options:
      host: 192.0.2.9
      user: root
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let node = SshNode::new(&suite.nodes[0]).unwrap();
        assert_eq!(node.inner.opts.port, 22);
    }

    #[tokio::test]
    async fn execute_before_setup_is_an_error() {
        let doc = r#"
nodes:
  - name: far
    type: ssh
    options: {host: 192.0.2.9, user: root}
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let node = SshNode::new(&suite.nodes[0]).unwrap();
        let err = node.execute("true").await.unwrap_err();
        assert!(err.to_string().contains("setup not run"));
    }
}
