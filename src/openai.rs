//! HTTP plumbing shared by the OpenAI-compatible chat, embedding and image clients.

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HomeMatchError, Result};

/// Async client for an OpenAI-compatible API with retry on transient failures.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    auth: HeaderValue,
    max_retries: usize,
    retry_base: Duration,
}

const RETRY_BASE: Duration = Duration::from_millis(500);

impl OpenAiClient {
    /// Builds a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(HomeMatchError::Config("missing OpenAI API key".to_string()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HomeMatchError::Config(format!(
                "OpenAI base URL must be an http(s) URL, got {base_url}"
            )));
        }
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| HomeMatchError::Config("invalid OpenAI API key".to_string()))?;
        auth.set_sensitive(true);
        let builder = Client::builder().timeout(timeout);
        // tests talk to loopback stubs
        #[cfg(test)]
        let builder = builder.no_proxy();
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            max_retries: max_retries.max(1),
            retry_base: RETRY_BASE,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Full URL for an endpoint path such as `chat/completions`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POSTs `body` as JSON and decodes the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B, service: &'static str) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let mut attempt = 0usize;
        loop {
            let response = self
                .client
                .post(&url)
                .header(AUTHORIZATION, self.auth.clone())
                .json(body)
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.json::<T>().await?);
                    }
                    let text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(service, %status, attempt, "retrying request");
                        tokio::time::sleep(retry_backoff(self.retry_base, attempt)).await;
                        continue;
                    }
                    return Err(HomeMatchError::Api {
                        service,
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(service, error = %err, attempt, "retrying request");
                        tokio::time::sleep(retry_backoff(self.retry_base, attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Downloads a resource without the API credentials attached.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "downloading");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HomeMatchError::Api {
                service: "download",
                status: status.as_u16(),
                body: url.to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(base: Duration, attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    base * (1 << capped)
}
