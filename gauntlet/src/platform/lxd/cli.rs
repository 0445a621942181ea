//! Plumbing over the system-container runtime CLI (`lxc` or `incus`).
//!
//! One handle is shared by the platform manager and every node that talks
//! to the local runtime. When the manager creates a project it rebinds the
//! handle so all subsequent operations are scoped with `--project`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use gauntlet_common::config::LxdProfileConfig;
use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};

use crate::platform::detect::Runtime;
use crate::platform::host;

/// Shared handle over the runtime CLI.
#[derive(Debug)]
pub struct LxdCli {
    runtime: Runtime,
    project: Mutex<Option<String>>,
}

/// Instance state as reported by `query /1.0/instances/<name>/state`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub network: BTreeMap<String, NetworkState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkState {
    #[serde(default)]
    pub addresses: Vec<AddressState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressState {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub scope: String,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }

    /// True when at least one interface carries a global-scope address.
    pub fn has_global_address(&self) -> bool {
        self.network
            .values()
            .flat_map(|net| net.addresses.iter())
            .any(|addr| addr.scope == "global")
    }
}

#[derive(Serialize)]
struct ProfileDocument<'a> {
    description: &'a str,
    config: &'a BTreeMap<String, String>,
    devices: BTreeMap<String, BTreeMap<String, String>>,
}

impl LxdCli {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            project: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    fn binary(&self) -> &'static str {
        self.runtime.binary()
    }

    /// Scope all subsequent operations to a project.
    pub fn use_project(&self, project: &str) {
        *self.project.lock().unwrap() = Some(project.to_string());
    }

    pub fn clear_project(&self) {
        *self.project.lock().unwrap() = None;
    }

    pub fn current_project(&self) -> Option<String> {
        self.project.lock().unwrap().clone()
    }

    fn project_args(&self) -> Vec<String> {
        match self.current_project() {
            Some(project) => vec!["--project".to_string(), project],
            None => Vec::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let project = self.project_args();
        let mut all: Vec<&str> = args.to_vec();
        for arg in &project {
            all.push(arg);
        }
        host::run_checked(self.binary(), &all).await
    }

    /// Create and configure an instance without starting it.
    pub async fn init_instance(
        &self,
        name: &str,
        image: &str,
        virtual_machine: bool,
        profiles: &[String],
    ) -> Result<()> {
        let mut args = vec!["init", image, name];
        if virtual_machine {
            args.push("--vm");
        }
        for profile in profiles {
            args.push("--profile");
            args.push(profile);
        }
        self.run(&args).await?;
        Ok(())
    }

    /// Attach a NIC device, optionally pinning a static address.
    pub async fn add_nic(
        &self,
        instance: &str,
        device: &str,
        network: &str,
        static_address: Option<(&str, &str)>,
    ) -> Result<()> {
        let network_arg = format!("network={network}");
        let mut args: Vec<&str> =
            vec!["config", "device", "add", instance, device, "nic", &network_arg];
        let addr_arg;
        if let Some((key, address)) = static_address {
            addr_arg = format!("{key}={address}");
            args.push(&addr_arg);
        }
        self.run(&args).await?;
        Ok(())
    }

    pub async fn start_instance(&self, name: &str) -> Result<()> {
        self.run(&["start", name]).await?;
        Ok(())
    }

    pub async fn stop_instance(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["stop", name];
        if force {
            args.push("--force");
        }
        self.run(&args).await?;
        Ok(())
    }

    pub async fn delete_instance(&self, name: &str) -> Result<()> {
        self.run(&["delete", name]).await?;
        Ok(())
    }

    pub async fn instance_state(&self, name: &str) -> Result<InstanceState> {
        let mut path = format!("/1.0/instances/{name}/state");
        if let Some(project) = self.current_project() {
            path = format!("{path}?project={project}");
        }
        let raw = host::run_checked(self.binary(), &["query", &path]).await?;
        serde_json::from_str(&raw).map_err(|err| {
            HarnessError::internal(format!("unparsable instance state for {name}: {err}"))
        })
    }

    /// Run a command in an instance with `/bin/sh -c` semantics.
    pub async fn exec(
        &self,
        instance: &str,
        node_label: &str,
        command: &str,
        opts: &ExecOptions,
    ) -> Result<ExecutionResult> {
        let shell = opts.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());
        let stdin = opts.sudo.as_ref().and_then(|s| s.resolve());

        let mut cli = Command::new(self.binary());
        cli.arg("exec").arg(instance);
        for arg in self.project_args() {
            cli.arg(arg);
        }
        for (key, value) in &opts.env {
            cli.args(["--env", &format!("{key}={value}")]);
        }
        cli.args(["--", shell.as_str(), "-c", command]);

        host::capture(cli, node_label, stdin).await
    }

    pub async fn create_network(&self, name: &str, subnet: &str, gateway: &str) -> Result<()> {
        let mut args: Vec<String> = vec!["network".into(), "create".into(), name.into()];
        if !gateway.is_empty() && !subnet.is_empty() {
            // The runtime expects the gateway in CIDR form on the bridge.
            let prefix = subnet.split('/').nth(1).unwrap_or("24");
            args.push(format!("ipv4.address={gateway}/{prefix}"));
        } else if !subnet.is_empty() {
            args.push(format!("ipv4.address={subnet}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        Ok(())
    }

    pub async fn delete_network(&self, name: &str) -> Result<()> {
        self.run(&["network", "delete", name]).await?;
        Ok(())
    }

    pub async fn profile_exists(&self, name: &str) -> bool {
        self.run(&["profile", "show", name]).await.is_ok()
    }

    /// Create or replace a profile from its declarative config.
    pub async fn apply_profile(&self, cfg: &LxdProfileConfig) -> Result<()> {
        if !self.profile_exists(&cfg.name).await {
            self.run(&["profile", "create", &cfg.name]).await?;
        }

        let mut devices = BTreeMap::new();
        for (dev_name, dev) in &cfg.devices {
            let mut entry = BTreeMap::new();
            entry.insert("type".to_string(), dev.device_type.clone());
            if let Some(path) = &dev.path {
                entry.insert("path".to_string(), path.clone());
            }
            if let Some(pool) = &dev.pool {
                entry.insert("pool".to_string(), pool.clone());
            }
            if let Some(name) = &dev.name {
                entry.insert("name".to_string(), name.clone());
            }
            for (k, v) in &dev.opts {
                entry.insert(k.clone(), v.clone());
            }
            devices.insert(dev_name.clone(), entry);
        }

        let document = ProfileDocument {
            description: &cfg.description,
            config: &cfg.config,
            devices,
        };
        let yaml = serde_yaml::to_string(&document)
            .map_err(|err| HarnessError::internal(format!("profile serialization: {err}")))?;

        let mut cli = Command::new(self.binary());
        cli.args(["profile", "edit", &cfg.name]);
        for arg in self.project_args() {
            cli.arg(arg);
        }
        let mut result = host::capture(cli, "lxd", Some(yaml)).await?;
        if result.exit_code != 0 {
            let stderr = result.stderr.read_all();
            return Err(HarnessError::execution(format!(
                "could not apply profile {}: {}",
                cfg.name,
                stderr.trim()
            )));
        }
        Ok(())
    }

    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        self.run(&["profile", "delete", name]).await?;
        Ok(())
    }

    /// Copy a profile into another project when it is missing there.
    pub async fn copy_profile_to_project(
        &self,
        profile: &str,
        source_project: &str,
        target_project: &str,
    ) -> Result<()> {
        let exists = host::run_checked(
            self.binary(),
            &["profile", "show", profile, "--project", target_project],
        )
        .await
        .is_ok();
        if exists {
            return Ok(());
        }

        host::run_checked(
            self.binary(),
            &[
                "profile",
                "copy",
                profile,
                profile,
                "--project",
                source_project,
                "--target-project",
                target_project,
            ],
        )
        .await?;
        Ok(())
    }

    /// Create a project, defaulting the isolation features on.
    pub async fn create_project(&self, name: &str, config: &BTreeMap<String, String>) -> Result<()> {
        let mut merged = config.clone();
        for feature in [
            "features.images",
            "features.profiles",
            "features.storage.volumes",
            "features.networks",
        ] {
            merged
                .entry(feature.to_string())
                .or_insert_with(|| "true".to_string());
        }

        let mut args: Vec<String> = vec!["project".into(), "create".into(), name.into()];
        for (k, v) in &merged {
            args.push("-c".into());
            args.push(format!("{k}={v}"));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        host::run_checked(self.binary(), &arg_refs).await?;
        Ok(())
    }

    pub async fn delete_project(&self, name: &str) -> Result<()> {
        host::run_checked(self.binary(), &["project", "delete", name]).await?;
        Ok(())
    }

    /// Number of instances living inside a project.
    pub async fn instances_in_project(&self, project: &str) -> Result<usize> {
        let path = format!("/1.0/instances?project={project}");
        let raw = host::run_checked(self.binary(), &["query", &path]).await?;
        let urls: Vec<String> = serde_json::from_str(&raw).map_err(|err| {
            HarnessError::internal(format!("unparsable instance list for {project}: {err}"))
        })?;
        Ok(urls.len())
    }

    /// Pre-fetch an image so instance creation does not pay the download.
    pub async fn copy_image(&self, reference: &str, alias: &str) -> Result<()> {
        let mut args = vec!["image", "copy", reference, "local:", "--alias", alias];
        let project = self.project_args();
        for arg in &project {
            args.push(arg);
        }
        host::run_checked(self.binary(), &args).await?;
        Ok(())
    }

    pub async fn delete_image(&self, alias: &str) -> Result<()> {
        self.run(&["image", "delete", alias]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parses_running_with_global_address() {
        let raw = r#"{
            "status": "Running",
            "network": {
                "eth0": {
                    "addresses": [
                        {"family": "inet", "address": "10.7.0.5", "netmask": "24", "scope": "global"},
                        {"family": "inet6", "address": "fe80::1", "netmask": "64", "scope": "link"}
                    ]
                },
                "lo": {
                    "addresses": [
                        {"family": "inet", "address": "127.0.0.1", "netmask": "8", "scope": "local"}
                    ]
                }
            }
        }"#;
        let state: InstanceState = serde_json::from_str(raw).unwrap();
        assert!(state.is_running());
        assert!(state.has_global_address());
    }

    #[test]
    fn state_without_global_addresses_is_not_ready() {
        let raw = r#"{
            "status": "Running",
            "network": {
                "eth0": {"addresses": [{"family": "inet6", "address": "fe80::1", "scope": "link"}]}
            }
        }"#;
        let state: InstanceState = serde_json::from_str(raw).unwrap();
        assert!(state.is_running());
        assert!(!state.has_global_address());
    }

    #[test]
    fn stopped_state_with_null_network_parses() {
        let state: InstanceState =
            serde_json::from_str(r#"{"status": "Stopped"}"#).unwrap();
        assert!(!state.is_running());
        assert!(!state.has_global_address());
    }
}
