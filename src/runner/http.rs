//! HTTP transport: posts multipart form data to `{base_url}?app=..&action=..`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use tracing::{debug, warn};

use crate::error::TransportError;

use super::{Input, Runner};

/// HTTP endpoint, proxy, basic-auth and retry settings for [`HttpRunner`].
#[derive(Debug, Clone)]
pub struct HttpRunnerConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub basic_auth: Option<(String, String)>,
    pub proxy: Option<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for HttpRunnerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(120),
            basic_auth: None,
            proxy: None,
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Posts form data over HTTP, retrying connection errors up to `max_retries`
/// times with a fixed delay between attempts.
pub struct HttpRunner {
    client: reqwest::Client,
    config: HttpRunnerConfig,
}

impl HttpRunner {
    pub fn new(config: HttpRunnerConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn build_request(&self, input: &Input) -> reqwest::RequestBuilder {
        let url = format!(
            "{}?app={}&action={}",
            self.config.base_url, input.app, input.action
        );
        let mut form = multipart::Form::new();
        for (key, value) in &input.params {
            form = form.clone().text(key.clone(), value.clone());
        }
        for (key, file) in &input.files {
            let part = multipart::Part::bytes(file.bytes.clone()).file_name(file.name.clone());
            form = form.part(key.clone(), part);
        }

        let mut req = self.client.post(url).multipart(form);
        if let Some((user, pass)) = &self.config.basic_auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    async fn run_once(&self, input: &Input) -> Result<Vec<u8>, TransportError> {
        let response = self
            .build_request(input)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Endpoint {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Runner for HttpRunner {
    async fn run(&self, input: Input) -> Result<Vec<u8>, TransportError> {
        let mut attempt = 0;
        loop {
            match self.run_once(&input).await {
                Ok(body) => return Ok(body),
                Err(TransportError::Connection(msg)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, %msg, "retrying after connection error");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    debug!(app = %input.app, action = %input.action, error = %e, "runner call failed");
                    return Err(e);
                }
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }
}
