//! HTTP client for the Fabric REST control plane.
//!
//! Synchronous (200/201) and asynchronous (202 + `Location`) responses are
//! folded into one awaited call: accepted requests are polled until the
//! operation reaches a terminal state or the poll timeout expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use crate::auth::{TokenProvider, FABRIC_AUDIENCE};
use crate::creator::ResourceDirectory;
use crate::error::{truncate_body, Error, Result};
use crate::model::{ResourceKind, ResourceRecord};
use crate::reconciler::{DefinitionEndpoints, UpdateEndpoint};
use crate::resources::{ConnectionSpec, WarehouseSpec};
use crate::wire;

/// Default HTTP timeout for a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Public Fabric REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.fabric.microsoft.com";

/// Upper bound on `continuationUri` pages followed by a listing.
pub const MAX_LIST_PAGES: usize = 10;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Polling behavior for long-running operations.
#[derive(Debug, Clone)]
pub struct LroConfig {
    /// Interval used when the service sends no `Retry-After`.
    pub default_poll_interval: Duration,
    /// Floor applied to every poll delay, including `Retry-After: 0`.
    pub min_poll_interval: Duration,
    /// Absolute bound on polling one operation.
    pub timeout: Duration,
    /// Poll bound for definition updates, which fail fast when they fail.
    pub definition_timeout: Duration,
}

impl Default for LroConfig {
    fn default() -> Self {
        Self {
            default_poll_interval: Duration::from_secs(5),
            min_poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1800),
            definition_timeout: Duration::from_secs(120),
        }
    }
}

impl LroConfig {
    /// Delay before the next poll: `Retry-After` when sent, else the default
    /// interval, never below the floor and never past `remaining`.
    #[must_use]
    pub fn poll_delay(&self, retry_after: Option<Duration>, remaining: Duration) -> Duration {
        retry_after
            .unwrap_or(self.default_poll_interval)
            .max(self.min_poll_interval)
            .min(remaining)
    }
}

/// Raw outcome of one request: the parsed body and, for accepted requests,
/// the operation URL that was polled to completion.
#[derive(Debug, Clone)]
struct Completed {
    body: Value,
    operation_url: Option<String>,
}

/// Client for the Fabric control plane.
pub struct FabricClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    lro: LroConfig,
}

impl FabricClient {
    /// Creates a client for `base_url` authenticating through `tokens`.
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: create_http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            lro: LroConfig::default(),
        }
    }

    /// Overrides operation polling behavior.
    #[must_use]
    pub fn with_lro_config(mut self, lro: LroConfig) -> Self {
        self.lro = lro;
        self
    }

    /// Polling behavior in effect.
    #[must_use]
    pub fn lro_config(&self) -> &LroConfig {
        &self.lro
    }

    /// Absolute URL for an API path (`/v1/...`).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Scopes the client to one workspace.
    #[must_use]
    pub fn workspace<'a>(&'a self, workspace_id: &'a str) -> WorkspaceScope<'a> {
        WorkspaceScope {
            client: self,
            workspace_id,
        }
    }

    /// Issues a request and waits for any accepted operation to finish.
    ///
    /// Returns the response body, or an empty object when there is none.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolViolation`] for a 202 without `Location`,
    /// [`Error::OperationFailed`] when the operation fails or is cancelled,
    /// [`Error::Timeout`] when polling exceeds the timeout, and a classified
    /// API error for any other status.
    pub async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let timeout = self.lro.timeout;
        self.execute(method, url, body, timeout)
            .await
            .map(|c| c.body)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        lro_timeout: Duration,
    ) -> Result<Completed> {
        let url = self.url(url);
        let response = self.send(method.clone(), &url, body).await?;
        let status = response.status();

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                let text = response.text().await?;
                Ok(Completed {
                    body: wire::parse_body(&text),
                    operation_url: None,
                })
            }
            StatusCode::ACCEPTED => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|l| self.url(l));
                let text = response.text().await.unwrap_or_default();
                let Some(location) = location else {
                    return Err(Error::ProtocolViolation(format!(
                        "Fabric returned 202 without Location header for {url}. Response: {}",
                        truncate_body(&text)
                    )));
                };

                self.poll_operation(&location, lro_timeout).await?;

                // Poll bodies do not carry the resource; re-read it for GETs.
                let body = if method == Method::GET {
                    self.fetch_once(&url).await?
                } else {
                    wire::parse_body(&text)
                };
                Ok(Completed {
                    body,
                    operation_url: Some(location),
                })
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(wire::classify_error(status.as_u16(), &url, &text))
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.tokens.get_token(FABRIC_AUDIENCE).await?;
        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token.secret());
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Plain GET expecting 200/201.
    async fn fetch_once(&self, url: &str) -> Result<Value> {
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if matches!(status, StatusCode::OK | StatusCode::CREATED) {
            Ok(wire::parse_body(&text))
        } else {
            Err(wire::classify_error(status.as_u16(), url, &text))
        }
    }

    /// Polls an operation URL until it succeeds, fails, or times out.
    #[instrument(skip(self))]
    async fn poll_operation(&self, location: &str, timeout: Duration) -> Result<Value> {
        use crate::model::OperationStatus;

        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            if started.elapsed() > timeout {
                return Err(Error::Timeout {
                    operation: format!("Fabric operation {location}"),
                    attempts: polls,
                    elapsed: started.elapsed(),
                    last_error: None,
                });
            }

            polls += 1;
            let response = self.send(Method::GET, location, None).await?;
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                return Err(wire::classify_error(status.as_u16(), location, &text));
            }

            let body = wire::parse_body(&text);
            match wire::parse_operation_status(&body, location)? {
                OperationStatus::Succeeded => {
                    debug!("Operation {} succeeded after {} polls", location, polls);
                    return Ok(body);
                }
                OperationStatus::Failed | OperationStatus::Cancelled => {
                    let terminal = ["status", "state"]
                        .iter()
                        .find_map(|k| body.get(*k).and_then(Value::as_str))
                        .unwrap_or("failed")
                        .to_string();
                    return Err(wire::classify_failed_operation(&body, location, &terminal));
                }
                OperationStatus::Running(state) => {
                    let delay = self
                        .lro
                        .poll_delay(retry_after, timeout.saturating_sub(started.elapsed()));
                    debug!("Operation {} is {}, polling again in {:?}", location, state, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Lists every record behind `url`, following `continuationUri`.
    ///
    /// # Errors
    ///
    /// Propagates request errors.
    pub async fn list_all(&self, url: &str) -> Result<Vec<ResourceRecord>> {
        let mut records = Vec::new();
        let mut next = Some(self.url(url));

        for _ in 0..MAX_LIST_PAGES {
            let Some(page_url) = next.take() else { break };
            let page = self.request(Method::GET, &page_url, None).await?;
            let (items, continuation) = wire::parse_resource_page(&page);
            records.extend(items);
            next = continuation;
        }
        if next.is_some() {
            warn!("Listing {} truncated after {} pages", url, MAX_LIST_PAGES);
        }
        Ok(records)
    }

    /// Creates a shareable cloud SQL connection (tenant scoped).
    ///
    /// # Errors
    ///
    /// Propagates classified request errors.
    #[instrument(skip(self, spec), fields(display_name = %spec.display_name))]
    pub async fn create_connection(&self, spec: &ConnectionSpec) -> Result<ResourceRecord> {
        let body = spec.create_body();
        let created = self
            .request(Method::POST, "/v1/connections", Some(&body))
            .await?;
        Ok(wire::parse_resource(&created))
    }
}

/// A [`FabricClient`] bound to one workspace.
#[derive(Clone, Copy)]
pub struct WorkspaceScope<'a> {
    client: &'a FabricClient,
    workspace_id: &'a str,
}

impl<'a> WorkspaceScope<'a> {
    /// Workspace id.
    #[must_use]
    pub fn workspace_id(&self) -> &str {
        self.workspace_id
    }

    /// Underlying client.
    #[must_use]
    pub fn client(&self) -> &'a FabricClient {
        self.client
    }

    fn items_path(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::Connection => "/v1/connections".to_string(),
            _ => format!(
                "/v1/workspaces/{}/{}",
                self.workspace_id,
                kind.collection()
            ),
        }
    }

    /// Creates a warehouse.
    ///
    /// # Errors
    ///
    /// Propagates classified request errors.
    #[instrument(skip(self, spec), fields(workspace_id = %self.workspace_id, display_name = %spec.display_name))]
    pub async fn create_warehouse(&self, spec: &WarehouseSpec) -> Result<ResourceRecord> {
        let body = spec.create_body();
        let created = self
            .client
            .request(
                Method::POST,
                &self.items_path(ResourceKind::Warehouse),
                Some(&body),
            )
            .await?;
        Ok(wire::parse_resource(&created))
    }

    /// Creates an empty copy-job item (display name only, no definition).
    ///
    /// # Errors
    ///
    /// Propagates classified request errors.
    #[instrument(skip(self), fields(workspace_id = %self.workspace_id))]
    pub async fn create_copy_job(&self, display_name: &str) -> Result<ResourceRecord> {
        let body = json!({ "displayName": display_name });
        let created = self
            .client
            .request(
                Method::POST,
                &self.items_path(ResourceKind::CopyJob),
                Some(&body),
            )
            .await?;
        Ok(wire::parse_resource(&created))
    }

    /// Fetches the current copy-job content, if it can be read.
    ///
    /// # Errors
    ///
    /// Propagates classified request errors; an unreadable definition is `Ok(None)`.
    pub async fn get_copy_job_content(&self, job_id: &str) -> Result<Option<Map<String, Value>>> {
        let url = format!(
            "{}/{}/getDefinition",
            self.items_path(ResourceKind::CopyJob),
            job_id
        );
        let completed = self
            .client
            .execute(Method::POST, &url, None, self.client.lro.timeout)
            .await?;
        let definition = match completed.operation_url {
            Some(operation) => {
                self.client
                    .fetch_once(&format!("{}/result", operation.trim_end_matches('/')))
                    .await?
            }
            None => completed.body,
        };
        Ok(wire::decode_definition_content(&definition))
    }
}

#[async_trait]
impl ResourceDirectory for WorkspaceScope<'_> {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>> {
        self.client.list_all(&self.items_path(kind)).await
    }
}

#[async_trait]
impl DefinitionEndpoints for WorkspaceScope<'_> {
    async fn update_definition(
        &self,
        endpoint: UpdateEndpoint,
        job_id: &str,
        content: &Value,
    ) -> Result<()> {
        let collection = match endpoint {
            UpdateEndpoint::CopyJobs => "copyJobs",
            UpdateEndpoint::Items => "items",
        };
        let url = format!(
            "/v1/workspaces/{}/{}/{}/updateDefinition",
            self.workspace_id, collection, job_id
        );
        let body = wire::encode_definition(content);
        self.client
            .execute(
                Method::POST,
                &url,
                Some(&body),
                self.client.lro.definition_timeout,
            )
            .await
            .map(|_| ())
    }
}
