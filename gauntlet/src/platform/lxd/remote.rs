//! Remote system-container servers over HTTPS.
//!
//! Three credentials are tried in priority order: a one-time trust token
//! (the client generates an ephemeral RSA keypair and self-signed client
//! certificate, then registers it with the server), static client
//! certificate and key paths, and finally skip-verify with no identity at
//! all, which requires an explicit operator opt-in.
//!
//! Instance operations go through the server's REST API. Command execution
//! uses recorded output so no websocket attach is needed: the operation
//! completes, the exit code arrives in its metadata, and the captured
//! streams are fetched from the server's log endpoints.

use std::collections::BTreeMap;

use base64::Engine;
use rsa::pkcs8::EncodePrivateKey;
use serde::Deserialize;
use serde_json::json;

use gauntlet_common::errors::{HarnessError, Result};
use gauntlet_common::exec::{ExecOptions, ExecutionResult};
use gauntlet_common::ui::{tee, StreamKind};

use super::cli::InstanceState;

const CLIENT_CERT_CN: &str = "dart-lxd-client";
const CLIENT_CERT_ORG: &str = "DART";
const OPERATION_TIMEOUT_SECS: u32 = 600;

/// How to authenticate against a remote server.
#[derive(Debug, Clone)]
pub enum RemoteAuth {
    /// One-time bearer string; an ephemeral client certificate is
    /// generated and registered with it.
    TrustToken(String),
    /// Paths to a static client certificate and key (PEM).
    ClientCert { cert: String, key: String },
    /// No identity. Only permitted with an explicit opt-in.
    SkipVerifyOnly,
}

/// Connection parameters for a remote server.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub address: String,
    pub auth: RemoteAuth,
    /// Pinned server certificate (PEM path). Without it TLS verification
    /// is skipped.
    pub server_cert: Option<String>,
    pub skip_verify: bool,
}

/// A connected remote server.
#[derive(Debug)]
pub struct RemoteLxd {
    base: String,
    client: reqwest::Client,
}

/// Generate the ephemeral 2048-bit RSA keypair and self-signed client
/// certificate used for trust-token registration. Returns (cert, key) PEM.
fn generate_client_identity() -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|err| HarnessError::internal(format!("rsa keygen failed: {err}")))?;
    let key_pem = private_key
        .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|err| HarnessError::internal(format!("key encoding failed: {err}")))?
        .to_string();

    let key_pair = rcgen::KeyPair::from_pem(&key_pem)
        .map_err(|err| HarnessError::internal(format!("key import failed: {err}")))?;

    let mut params = rcgen::CertificateParams::default();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, CLIENT_CERT_CN);
    dn.push(rcgen::DnType::OrganizationName, CLIENT_CERT_ORG);
    params.distinguished_name = dn;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];

    let cert = params
        .self_signed(&key_pair)
        .map_err(|err| HarnessError::internal(format!("certificate generation failed: {err}")))?;

    Ok((cert.pem(), key_pem))
}

fn build_client(
    identity_pem: Option<&str>,
    server_cert: Option<&str>,
    skip_verify: bool,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();

    if let Some(pem) = identity_pem {
        let identity = reqwest::Identity::from_pem(pem.as_bytes())
            .map_err(|err| HarnessError::execution(format!("invalid client identity: {err}")))?;
        builder = builder.identity(identity);
    }

    match server_cert {
        Some(path) => {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|err| HarnessError::execution(format!("invalid server cert: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        None if skip_verify => {
            builder = builder.danger_accept_invalid_certs(true);
        }
        None => {
            // Self-signed server certs are the norm; without a pinned cert
            // verification cannot succeed.
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|err| HarnessError::execution(format!("could not build https client: {err}")))
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "type", default)]
    response_type: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u32,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    status_code: u32,
    #[serde(default)]
    err: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl RemoteLxd {
    /// Connect to a remote server, establishing trust per the configured
    /// credential.
    pub async fn connect(node_name: &str, options: &RemoteOptions) -> Result<Self> {
        let base = options.address.trim_end_matches('/').to_string();

        match &options.auth {
            RemoteAuth::TrustToken(token) => {
                let (cert_pem, key_pem) = generate_client_identity()?;
                let identity = format!("{cert_pem}{key_pem}");
                let client = build_client(
                    Some(&identity),
                    options.server_cert.as_deref(),
                    options.skip_verify,
                )?;
                let remote = Self { base, client };
                remote.register_certificate(node_name, &cert_pem, token).await?;
                Ok(remote)
            }
            RemoteAuth::ClientCert { cert, key } => {
                let cert_pem = std::fs::read_to_string(cert)?;
                let key_pem = std::fs::read_to_string(key)?;
                let identity = format!("{cert_pem}{key_pem}");
                let client = build_client(
                    Some(&identity),
                    options.server_cert.as_deref(),
                    options.skip_verify,
                )?;
                Ok(Self { base, client })
            }
            RemoteAuth::SkipVerifyOnly => {
                if !options.skip_verify {
                    return Err(HarnessError::execution(
                        "remote connection requires a trust_token, client_cert/client_key, \
                         or an explicit skip_verify opt-in"
                            .to_string(),
                    ));
                }
                let client = build_client(None, options.server_cert.as_deref(), true)?;
                Ok(Self { base, client })
            }
        }
    }

    /// Register the generated client certificate using a trust token.
    async fn register_certificate(&self, node_name: &str, cert_pem: &str, token: &str) -> Result<()> {
        let payload = json!({
            "name": format!("dart-{node_name}"),
            "type": "client",
            "certificate": base64::engine::general_purpose::STANDARD.encode(cert_pem),
            "trust_token": token,
        });
        self.post("/1.0/certificates", &payload).await?;
        tracing::debug!(node = node_name, "registered client certificate with trust token");
        Ok(())
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> Result<ApiResponse> {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(payload)
            .send()
            .await
            .map_err(|err| HarnessError::execution(format!("request to {path} failed: {err}")))?;
        Self::decode(response).await
    }

    async fn get(&self, path: &str) -> Result<ApiResponse> {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .map_err(|err| HarnessError::execution(format!("request to {path} failed: {err}")))?;
        Self::decode(response).await
    }

    async fn put(&self, path: &str, payload: &serde_json::Value) -> Result<ApiResponse> {
        let response = self
            .client
            .put(format!("{}{path}", self.base))
            .json(payload)
            .send()
            .await
            .map_err(|err| HarnessError::execution(format!("request to {path} failed: {err}")))?;
        Self::decode(response).await
    }

    async fn delete(&self, path: &str) -> Result<ApiResponse> {
        let response = self
            .client
            .delete(format!("{}{path}", self.base))
            .send()
            .await
            .map_err(|err| HarnessError::execution(format!("request to {path} failed: {err}")))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<ApiResponse> {
        let api: ApiResponse = response
            .json()
            .await
            .map_err(|err| HarnessError::execution(format!("unparsable server response: {err}")))?;
        if api.response_type == "error" {
            return Err(HarnessError::execution(format!(
                "server error {}: {}",
                api.error_code, api.error
            )));
        }
        Ok(api)
    }

    /// Block until an async operation finishes, propagating its error.
    async fn wait_operation(&self, operation: &str) -> Result<serde_json::Value> {
        let path = format!("{operation}/wait?timeout={OPERATION_TIMEOUT_SECS}");
        let api = self.get(&path).await?;
        let op: Operation = serde_json::from_value(api.metadata)
            .map_err(|err| HarnessError::internal(format!("unparsable operation: {err}")))?;
        // 200 is Success in the status-code table shared by both runtimes.
        if op.status_code != 200 {
            return Err(HarnessError::execution(format!(
                "operation failed: {}",
                if op.err.is_empty() { "unknown error" } else { &op.err }
            )));
        }
        Ok(op.metadata)
    }

    pub async fn create_instance(
        &self,
        name: &str,
        image: &str,
        server: &str,
        protocol: &str,
        virtual_machine: bool,
        profiles: &[String],
        devices: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<()> {
        let payload = json!({
            "name": name,
            "type": if virtual_machine { "virtual-machine" } else { "container" },
            "source": {
                "type": "image",
                "alias": image,
                "server": server,
                "protocol": protocol,
            },
            "profiles": profiles,
            "devices": devices,
        });
        let api = self.post("/1.0/instances", &payload).await?;
        self.wait_operation(&api.operation).await?;
        Ok(())
    }

    pub async fn update_state(&self, name: &str, action: &str, force: bool) -> Result<()> {
        let payload = json!({
            "action": action,
            "timeout": -1,
            "force": force,
        });
        let api = self.put(&format!("/1.0/instances/{name}/state"), &payload).await?;
        self.wait_operation(&api.operation).await?;
        Ok(())
    }

    pub async fn instance_state(&self, name: &str) -> Result<InstanceState> {
        let api = self.get(&format!("/1.0/instances/{name}/state")).await?;
        serde_json::from_value(api.metadata)
            .map_err(|err| HarnessError::internal(format!("unparsable instance state: {err}")))
    }

    pub async fn delete_instance(&self, name: &str) -> Result<()> {
        let api = self.delete(&format!("/1.0/instances/{name}")).await?;
        self.wait_operation(&api.operation).await?;
        Ok(())
    }

    /// Execute a command with recorded output and collect the captured
    /// streams from the server's log endpoints.
    pub async fn exec(
        &self,
        name: &str,
        node_label: &str,
        command: &str,
        opts: &ExecOptions,
    ) -> Result<ExecutionResult> {
        let shell = opts.shell.clone().unwrap_or_else(|| "/bin/sh".to_string());
        let mut environment = serde_json::Map::new();
        for (k, v) in &opts.env {
            environment.insert(k.clone(), serde_json::Value::String(v.clone()));
        }

        let payload = json!({
            "command": [shell, "-c", command],
            "record-output": true,
            "wait-for-websocket": false,
            "interactive": false,
            "environment": environment,
        });
        let api = self.post(&format!("/1.0/instances/{name}/exec"), &payload).await?;
        let metadata = self.wait_operation(&api.operation).await?;

        let exit_code = metadata
            .get("return")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HarnessError::internal("exec operation reported no exit code"))?
            as i32;

        let stdout = self.fetch_output(&metadata, "1").await?;
        let stderr = self.fetch_output(&metadata, "2").await?;

        tee::emit_captured(node_label, StreamKind::Stdout, &stdout);
        tee::emit_captured(node_label, StreamKind::Stderr, &stderr);

        Ok(ExecutionResult::new(exit_code, stdout, stderr))
    }

    /// Download one recorded output stream, then delete it server-side.
    async fn fetch_output(&self, metadata: &serde_json::Value, fd: &str) -> Result<Vec<u8>> {
        let Some(path) = metadata
            .get("output")
            .and_then(|o| o.get(fd))
            .and_then(|p| p.as_str())
        else {
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .map_err(|err| HarnessError::execution(format!("log fetch failed: {err}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| HarnessError::execution(format!("log read failed: {err}")))?
            .to_vec();

        // Recorded output files accumulate; drop them once read.
        let _ = self.delete(path).await;

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_is_a_cert_and_a_key() {
        let (cert_pem, key_pem) = generate_client_identity().unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn skip_verify_requires_opt_in() {
        let options = RemoteOptions {
            address: "https://10.0.0.1:8443".into(),
            auth: RemoteAuth::SkipVerifyOnly,
            server_cert: None,
            skip_verify: false,
        };
        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(RemoteLxd::connect("edge", &options))
            .unwrap_err();
        assert!(err.to_string().contains("trust_token"));
    }
}
