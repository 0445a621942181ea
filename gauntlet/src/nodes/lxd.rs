//! System-container / system-VM node.
//!
//! Local instances are driven through the shared runtime CLI handle; remote
//! instances go over HTTPS with trust-token or certificate credentials.
//! Readiness is stricter than for plain containers: the instance must be
//! Running, hold at least one global-scope address, and answer a probe
//! command.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use gauntlet_common::config::NodeConfig;
use gauntlet_common::errors::{ConfigError, HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::node::Node;

use crate::platform::images::translate_image;
use crate::platform::lxd::cli::LxdCli;
use crate::platform::lxd::remote::{RemoteAuth, RemoteLxd, RemoteOptions};

use super::parse_options;

const READY_TIMEOUT: Duration = Duration::from_secs(300);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Deserialize)]
struct LxdNetworkOpts {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LxdNodeOpts {
    #[serde(default)]
    image: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    instance_type: String,
    #[serde(default)]
    profiles: Vec<String>,
    #[serde(default)]
    networks: Vec<LxdNetworkOpts>,
    #[serde(default)]
    remote_addr: Option<String>,
    #[serde(default)]
    trust_token: Option<String>,
    #[serde(default)]
    client_cert: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    server_cert: Option<String>,
    #[serde(default)]
    skip_verify: bool,
}

/// Well-known image remotes, used when a remote server needs an explicit
/// image source URL instead of a CLI-resolved alias.
fn image_source(image: &str, server: &str, protocol: &str) -> (String, String, String) {
    let mut alias = image.to_string();
    let mut server = if server.is_empty() {
        "https://images.linuxcontainers.org".to_string()
    } else {
        server.to_string()
    };
    let mut protocol = if protocol.is_empty() {
        "simplestreams".to_string()
    } else {
        protocol.to_string()
    };

    if let Some((remote, rest)) = image.split_once(':') {
        let known = match remote {
            "ubuntu" => Some("https://cloud-images.ubuntu.com/releases"),
            "images" | "lxc" => Some("https://images.linuxcontainers.org"),
            _ => None,
        };
        if let Some(url) = known {
            alias = rest.to_string();
            server = url.to_string();
            protocol = "simplestreams".to_string();
        }
    }

    (alias, server, protocol)
}

#[derive(Debug)]
enum Backend {
    Local(Arc<LxdCli>),
    Remote(Mutex<Option<RemoteLxd>>),
}

#[derive(Debug)]
pub struct LxdNode {
    name: String,
    opts: LxdNodeOpts,
    defaults: ExecOptions,
    virtual_machine: bool,
    backend: Backend,
}

impl LxdNode {
    pub fn new(cfg: &NodeConfig, cli: Arc<LxdCli>, virtual_machine: bool) -> Result<Self> {
        let opts: LxdNodeOpts = parse_options(cfg)?;

        let virtual_machine = virtual_machine || opts.instance_type == "virtual-machine";

        let backend = if opts.remote_addr.is_some() {
            let has_token = opts.trust_token.is_some();
            let has_cert_pair = opts.client_cert.is_some() && opts.client_key.is_some();
            let has_partial_pair =
                opts.client_cert.is_some() != opts.client_key.is_some();
            if !has_token && (has_partial_pair || (!has_cert_pair && !opts.skip_verify)) {
                return Err(ConfigError::new(
                    format!(
                        "remote connection for node {:?} requires either trust_token OR \
                         client_cert and client_key (or an explicit skip_verify)",
                        cfg.name
                    ),
                    cfg.loc.clone(),
                )
                .into());
            }
            Backend::Remote(Mutex::new(None))
        } else {
            Backend::Local(cli)
        };

        Ok(Self {
            name: cfg.name.clone(),
            opts,
            defaults: ExecOptions::from_option_bag(&cfg.options),
            virtual_machine,
            backend,
        })
    }

    /// NIC devices derived from the network options; static addresses are
    /// validated with the standard IP parser and keyed by family.
    fn nic_devices(&self) -> Result<Vec<(String, String, Option<(&'static str, String)>)>> {
        let mut devices = Vec::new();
        for (idx, net) in self.opts.networks.iter().enumerate() {
            let device = format!("eth{idx}");
            let static_addr = match &net.ip {
                Some(ip) => {
                    let parsed = IpAddr::from_str(ip).map_err(|_| {
                        HarnessError::execution(format!(
                            "invalid IP address for network {}: {}",
                            net.name, ip
                        ))
                    })?;
                    let key = if parsed.is_ipv4() {
                        "ipv4.address"
                    } else {
                        "ipv6.address"
                    };
                    Some((key, ip.clone()))
                }
                None => None,
            };
            devices.push((device, net.name.clone(), static_addr));
        }
        Ok(devices)
    }

    async fn remote(&self) -> Result<RemoteOptions> {
        let address = self
            .opts
            .remote_addr
            .clone()
            .ok_or_else(|| HarnessError::internal("remote options on a local node"))?;

        let auth = if let Some(token) = &self.opts.trust_token {
            RemoteAuth::TrustToken(token.clone())
        } else if let (Some(cert), Some(key)) = (&self.opts.client_cert, &self.opts.client_key) {
            RemoteAuth::ClientCert {
                cert: cert.clone(),
                key: key.clone(),
            }
        } else {
            RemoteAuth::SkipVerifyOnly
        };

        Ok(RemoteOptions {
            address,
            auth,
            server_cert: self.opts.server_cert.clone(),
            skip_verify: self.opts.skip_verify,
        })
    }

    async fn setup_local(&self, cli: &LxdCli) -> Result<()> {
        let image = translate_image(&self.opts.image, cli.runtime());
        cli.init_instance(&self.name, &image, self.virtual_machine, &self.opts.profiles)
            .await?;

        for (device, network, static_addr) in self.nic_devices()? {
            let addr = static_addr.as_ref().map(|(k, v)| (*k, v.as_str()));
            cli.add_nic(&self.name, &device, &network, addr).await?;
        }

        cli.start_instance(&self.name).await?;
        self.wait_ready_local(cli).await
    }

    async fn wait_ready_local(&self, cli: &LxdCli) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if let Ok(state) = cli.instance_state(&self.name).await {
                if state.is_running() && state.has_global_address() {
                    if let Ok(result) = cli
                        .exec(&self.name, &self.name, "true", &ExecOptions::default())
                        .await
                    {
                        if result.exit_code == 0 {
                            return Ok(());
                        }
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::ReadinessTimeout {
                    what: format!("instance {}", self.name),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn setup_remote(&self, slot: &Mutex<Option<RemoteLxd>>) -> Result<()> {
        let options = self.remote().await?;
        let remote = RemoteLxd::connect(&self.name, &options).await?;

        let (alias, server, protocol) =
            image_source(&self.opts.image, &self.opts.server, &self.opts.protocol);

        let mut devices = BTreeMap::new();
        for (device, network, static_addr) in self.nic_devices()? {
            let mut entry = BTreeMap::new();
            entry.insert("type".to_string(), "nic".to_string());
            entry.insert("network".to_string(), network);
            if let Some((key, value)) = static_addr {
                entry.insert(key.to_string(), value);
            }
            devices.insert(device, entry);
        }

        remote
            .create_instance(
                &self.name,
                &alias,
                &server,
                &protocol,
                self.virtual_machine,
                &self.opts.profiles,
                devices,
            )
            .await?;
        remote.update_state(&self.name, "start", false).await?;

        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if let Ok(state) = remote.instance_state(&self.name).await {
                if state.is_running() && state.has_global_address() {
                    if let Ok(result) = remote
                        .exec(&self.name, &self.name, "true", &ExecOptions::default())
                        .await
                    {
                        if result.exit_code == 0 {
                            break;
                        }
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::ReadinessTimeout {
                    what: format!("instance {}", self.name),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        *slot.lock().await = Some(remote);
        Ok(())
    }
}

#[async_trait]
impl Node for LxdNode {
    async fn setup(&self) -> Result<()> {
        match &self.backend {
            Backend::Local(cli) => self.setup_local(cli).await,
            Backend::Remote(slot) => self.setup_remote(slot).await,
        }
    }

    async fn teardown(&self) -> Result<()> {
        match &self.backend {
            Backend::Local(cli) => {
                cli.stop_instance(&self.name, true).await?;
                cli.delete_instance(&self.name).await
            }
            Backend::Remote(slot) => {
                let guard = slot.lock().await;
                let remote = guard
                    .as_ref()
                    .ok_or_else(|| HarnessError::execution("remote server not connected"))?;
                remote.update_state(&self.name, "stop", true).await?;
                remote.delete_instance(&self.name).await
            }
        }
    }

    async fn execute_with(&self, command: &str, opts: &ExecOptions) -> Result<ExecutionResult> {
        let opts = ExecOptions::layered(&self.defaults, opts);
        match &self.backend {
            Backend::Local(cli) => cli.exec(&self.name, &self.name, command, &opts).await,
            Backend::Remote(slot) => {
                let guard = slot.lock().await;
                let remote = guard
                    .as_ref()
                    .ok_or_else(|| HarnessError::execution("remote server not connected"))?;
                remote.exec(&self.name, &self.name, command, &opts).await
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::detect::Runtime;
    use gauntlet_common::config::Suite;
    use std::path::Path;

    fn node_from(doc: &str) -> Result<LxdNode> {
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        LxdNode::new(&suite.nodes[0], Arc::new(LxdCli::new(Runtime::Lxd)), false)
    }

    #[test]
    fn image_source_resolves_known_remotes() {
        let (alias, server, protocol) = image_source("ubuntu:24.04", "", "");
        assert_eq!(alias, "24.04");
        assert_eq!(server, "https://cloud-images.ubuntu.com/releases");
        assert_eq!(protocol, "simplestreams");

        let (alias, server, _) = image_source("images:alpine/3.20", "", "");
        assert_eq!(alias, "alpine/3.20");
        assert_eq!(server, "https://images.linuxcontainers.org");
    }

    #[test]
    fn image_source_defaults_for_bare_aliases() {
        let (alias, server, protocol) = image_source("noble", "", "");
        assert_eq!(alias, "noble");
        assert_eq!(server, "https://images.linuxcontainers.org");
        assert_eq!(protocol, "simplestreams");
    }

    #[test]
    fn remote_without_credentials_is_rejected() {
        let err = node_from(
            r#"
nodes:
  - name: edge
    type: lxd
    options:
      image: ubuntu:24.04
      remote_addr: https://192.0.2.5:8443
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("trust_token"));
    }

    #[test]
    fn remote_with_only_one_half_of_the_cert_pair_is_rejected() {
        let err = node_from(
            r#"
nodes:
  - name: edge
    type: lxd
    options:
      image: ubuntu:24.04
      remote_addr: https://192.0.2.5:8443
      client_cert: /path/client.crt
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("client_cert and client_key"));
    }

    #[test]
    fn remote_with_trust_token_passes_validation() {
        let node = node_from(
            r#"
nodes:
  - name: edge
    type: lxd
    options:
      image: ubuntu:24.04
      remote_addr: https://192.0.2.5:8443
      trust_token: eyJjbGllbnRfbmFtZSI6InRlc3QifQ==
"#,
        )
        .unwrap();
        assert!(matches!(node.backend, Backend::Remote(_)));
    }

    #[test]
    fn static_addresses_pick_the_family_key() {
        let node = node_from(
            r#"
nodes:
  - name: api
    type: lxd
    options:
      image: images:alpine/3.20
      networks:
        - name: testnet
          ip: 10.7.0.5
        - name: testnet6
          ip: fd42::5
"#,
        )
        .unwrap();
        let devices = node.nic_devices().unwrap();
        assert_eq!(devices[0].0, "eth0");
        assert_eq!(devices[0].2.as_ref().unwrap().0, "ipv4.address");
        assert_eq!(devices[1].0, "eth1");
        assert_eq!(devices[1].2.as_ref().unwrap().0, "ipv6.address");
    }

    #[test]
    fn bad_static_addresses_are_rejected() {
        let node = node_from(
            r#"
nodes:
  - name: api
    type: lxd
    options:
      image: images:alpine/3.20
      networks:
        - name: testnet
          ip: not-an-ip
"#,
        )
        .unwrap();
        assert!(node.nic_devices().is_err());
    }

    #[test]
    fn vm_alias_forces_virtual_machine() {
        let doc = r#"
nodes:
  - name: vm1
    type: lxd-vm
    options:
      image: ubuntu:24.04
"#;
        let suite = Suite::parse(doc, Path::new("."), "suite.yaml").unwrap();
        let node =
            LxdNode::new(&suite.nodes[0], Arc::new(LxdCli::new(Runtime::Lxd)), true).unwrap();
        assert!(node.virtual_machine);
    }
}
