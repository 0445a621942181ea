//! HTTP-request step: probe an endpoint and check the response.

use std::time::Duration;

use async_trait::async_trait;

use gauntlet_common::config::StepConfig;
use gauntlet_common::errors::{ConfigError, HarnessError, Result};
use gauntlet_common::ui::formatter::TaskHandle;

use super::{OptionBag, Step};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub struct HttpRequestStep {
    title: String,
    node_name: String,
    method: reqwest::Method,
    url: String,
    expected_status: u16,
    expected_body: Option<String>,
    timeout: Duration,
}

impl HttpRequestStep {
    pub fn from_config(cfg: &StepConfig) -> Result<Self> {
        let bag = OptionBag::new(cfg);
        let method_text = bag.str("method").unwrap_or_else(|| "GET".to_string());
        let method = method_text.to_uppercase().parse().map_err(|_| {
            ConfigError::new(
                format!("invalid HTTP method {method_text:?} in step {:?}", cfg.name),
                cfg.loc.clone(),
            )
        })?;

        Ok(Self {
            title: cfg.name.clone(),
            node_name: cfg.target_node().to_string(),
            method,
            url: bag.required_str("url")?,
            expected_status: bag.int("status").unwrap_or(200) as u16,
            expected_body: bag.str("contains"),
            timeout: Duration::from_secs(bag.int("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS as i64) as u64),
        })
    }
}

#[async_trait]
impl Step for HttpRequestStep {
    fn title(&self) -> &str {
        &self.title
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, handle: &dyn TaskHandle) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| HarnessError::execution(format!("could not build http client: {err}")))?;

        let response = match client.request(self.method.clone(), &self.url).send().await {
            Ok(response) => response,
            Err(err) => {
                handle.error();
                return Err(HarnessError::execution(format!("request failed: {err}")));
            }
        };

        let status = response.status().as_u16();
        if status != self.expected_status {
            handle.error();
            return Err(HarnessError::execution(format!(
                "unexpected status code: got {status}, expected {}",
                self.expected_status
            )));
        }

        if let Some(expected) = &self.expected_body {
            let body = response
                .text()
                .await
                .map_err(|err| HarnessError::execution(format!("failed to read response body: {err}")))?;
            if !body.contains(expected) {
                handle.error();
                return Err(HarnessError::execution(
                    "response validation failed: expected content missing",
                ));
            }
        }

        handle.complete();
        Ok(())
    }
}
