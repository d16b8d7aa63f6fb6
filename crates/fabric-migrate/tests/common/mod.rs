//! Common test utilities for fabric-migrate integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fabric_migrate::creator::CreatorConfig;
use fabric_migrate::provision::ProvisionOptions;
use fabric_migrate::resources::{ConnectionSpec, SourceCredentials, WarehouseSpec};
use fabric_migrate::{FabricClient, LroConfig, ProvisionRequest, RetryConfig, StaticTokenProvider};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const WORKSPACE: &str = "ws-1";
pub const TOKEN: &str = "mock-access-token";

/// Test data factory for a Fabric item.
pub fn create_item(id: &str, display_name: &str) -> Value {
    json!({ "id": id, "displayName": display_name, "workspaceId": WORKSPACE })
}

/// Wraps items in a Fabric list response.
pub fn create_list_response(items: Vec<Value>, continuation_uri: Option<&str>) -> Value {
    let mut response = json!({ "value": items });
    if let Some(uri) = continuation_uri {
        response["continuationUri"] = json!(uri);
    }
    response
}

/// Creates a Fabric error body.
pub fn create_fabric_error(code: &str, message: &str) -> Value {
    json!({ "errorCode": code, "message": message })
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Retry policy with millisecond delays.
pub fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        add_jitter: false,
        deadline: None,
    }
}

/// Provisioning options with millisecond delays.
pub fn quick_options() -> ProvisionOptions {
    ProvisionOptions {
        creator: CreatorConfig {
            name_propagation: quick_retry(3),
            id_lookup: quick_retry(5),
        },
        copy_job_lookup: quick_retry(5),
        reconcile: RetryConfig {
            deadline: Some(Duration::from_millis(500)),
            ..quick_retry(u32::MAX)
        },
    }
}

/// Operation polling with millisecond intervals.
pub fn quick_lro() -> LroConfig {
    LroConfig {
        default_poll_interval: Duration::from_millis(5),
        min_poll_interval: Duration::ZERO,
        timeout: Duration::from_millis(300),
        definition_timeout: Duration::from_millis(300),
    }
}

/// A provisioning request for `tables`.
pub fn create_request(tables: &[&str]) -> ProvisionRequest {
    ProvisionRequest {
        workspace_id: WORKSPACE.to_string(),
        warehouse: WarehouseSpec::named("W1"),
        warehouse_endpoint: None,
        connection: ConnectionSpec {
            display_name: "syn.sql.azuresynapse.net;sales".to_string(),
            server: "syn.sql.azuresynapse.net".to_string(),
            database: "sales".to_string(),
            existing_id: None,
            credentials: SourceCredentials {
                tenant_id: "tenant".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
            },
        },
        copy_job_name: "SynapseToFabric".to_string(),
        source_tables: tables.iter().map(|t| (*t).to_string()).collect(),
        default_schema: "dbo".to_string(),
        use_existing_template: false,
    }
}

/// Decodes the copy-job content sent in an `updateDefinition` request.
pub fn decode_update(request: &Request) -> Value {
    let body: Value = serde_json::from_slice(&request.body).expect("json body");
    let content = fabric_migrate::wire::decode_definition_content(&body).expect("content part");
    Value::Object(content)
}

/// Mock server wrapper with common setup helpers.
pub struct MockFabricServer {
    pub server: MockServer,
}

impl MockFabricServer {
    /// Creates a new mock Fabric API server.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Returns the mock server's base URL.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Client pointed at this server with fast polling.
    pub fn client(&self) -> FabricClient {
        FabricClient::new(self.url(), Arc::new(StaticTokenProvider::new(TOKEN)))
            .with_lro_config(quick_lro())
    }

    /// Sets up OAuth token endpoint.
    pub async fn mock_token_endpoint(&self, tenant_id: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/{}/oauth2/v2.0/token", tenant_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response(TOKEN, 3600)))
            .mount(&self.server)
            .await;
    }

    /// Sets up a list endpoint returning `items`.
    pub async fn mock_list(&self, list_path: &str, items: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(list_path.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(create_list_response(items, None)))
            .mount(&self.server)
            .await;
    }

    /// Sets up an operation that reports `status` on every poll.
    pub async fn mock_operation(&self, operation_id: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/operations/{operation_id}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({ "status": status })),
            )
            .mount(&self.server)
            .await;
    }

    /// A 202 response pointing at operation `operation_id`.
    pub fn accepted(&self, operation_id: &str) -> ResponseTemplate {
        ResponseTemplate::new(202)
            .insert_header("Location", format!("{}/v1/operations/{operation_id}", self.url()).as_str())
            .insert_header("Retry-After", "0")
    }

    /// Requests received for `request_path`, in order.
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }
}
