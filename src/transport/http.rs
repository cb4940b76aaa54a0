use super::{BoxFuture, Transport};
use crate::config::ConnectionConfig;
use crate::errors::{parse_error_response, EngageError};
use crate::event::EventBatch;
use crate::feedback::RecommendationFeedback;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const CONTENT_TYPE: &str = "application/json";
const BATCH_PATH: &str = "/activity/batch";
const FEEDBACK_PATH: &str = "/recommendations/feedback";
const BEACON_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport posting JSON to the collection endpoint.
///
/// Batches go to `{url}/activity/batch`, feedback to
/// `{url}/recommendations/feedback`. Beacons are serialized on the calling
/// thread and sent from a detached OS thread, so they outlive the caller's
/// task and runtime.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    auth_token: Option<String>,
    headers: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(config: ConnectionConfig) -> crate::Result<Self> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(EngageError::Builder("url is required".into()));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            base_url,
            client,
            auth_token: config.auth_token,
            headers: config.headers,
        })
    }

    /// Use a preconfigured reqwest client for asynchronous sends.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req
            .header("Content-Type", CONTENT_TYPE)
            .header("Accept", CONTENT_TYPE);

        if let Some(ref token) = self.auth_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        req
    }

    async fn post_no_response<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> crate::Result<()> {
        let req = self.apply_headers(self.client.post(self.url(path)).json(body));
        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.bytes().await?;
            return Err(parse_error_response(&body, status.as_u16()));
        }

        Ok(())
    }
}

impl Transport for HttpTransport {
    fn send_batch<'a>(&'a self, batch: &'a EventBatch) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(self.post_no_response(BATCH_PATH, batch))
    }

    fn send_beacon(&self, batch: &EventBatch) -> bool {
        let body = match serde_json::to_vec(batch) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize beacon payload");
                return false;
            }
        };

        let url = self.url(BATCH_PATH);
        let auth_token = self.auth_token.clone();
        let headers = self.headers.clone();

        let spawned = std::thread::Builder::new()
            .name("engage-beacon".into())
            .spawn(move || {
                let client = match reqwest::blocking::Client::builder()
                    .timeout(BEACON_TIMEOUT)
                    .build()
                {
                    Ok(client) => client,
                    Err(e) => {
                        tracing::warn!(error = %e, "beacon client unavailable");
                        return;
                    }
                };

                let mut req = client
                    .post(&url)
                    .header("Content-Type", CONTENT_TYPE)
                    .body(body);
                if let Some(token) = auth_token {
                    req = req.header("Authorization", format!("Bearer {}", token));
                }
                for (key, value) in &headers {
                    req = req.header(key.as_str(), value.as_str());
                }

                match req.send() {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        tracing::debug!(status = response.status().as_u16(), "beacon rejected");
                    }
                    Err(e) => tracing::debug!(error = %e, "beacon failed"),
                }
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn beacon thread");
                false
            }
        }
    }

    fn submit_feedback<'a>(
        &'a self,
        feedback: &'a RecommendationFeedback,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(self.post_no_response(FEEDBACK_PATH, feedback))
    }
}
