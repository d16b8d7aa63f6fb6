//! Token endpoint tests for the service-principal provider.

mod common;

use std::sync::Arc;

use common::*;
use fabric_migrate::auth::FABRIC_AUDIENCE;
use fabric_migrate::{Error, FabricClient, ServicePrincipalTokenProvider, TokenProvider};
use reqwest::Method;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_client_credentials_flow() {
    // Arrange
    let mock = MockFabricServer::new().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=app-1"))
        .and(body_string_contains("api.fabric.microsoft.com%2F.default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response(TOKEN, 3600)))
        .expect(1)
        .mount(&mock.server)
        .await;
    let provider =
        ServicePrincipalTokenProvider::new("tenant-1", "app-1", "secret").with_authority(mock.url());

    // Act
    let credential = provider.get_token(FABRIC_AUDIENCE).await.unwrap();

    // Assert
    assert_eq!(credential.secret(), TOKEN);
}

#[tokio::test]
async fn test_token_rejection_is_auth_error() {
    let mock = MockFabricServer::new().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#,
        ))
        .mount(&mock.server)
        .await;
    let provider =
        ServicePrincipalTokenProvider::new("tenant-1", "app-1", "wrong").with_authority(mock.url());

    let result = provider.get_token(FABRIC_AUDIENCE).await;

    match result {
        Err(Error::Auth(message)) => {
            assert!(message.contains("401"));
            assert!(message.contains("invalid_client"));
        }
        other => panic!("expected Auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_is_requested_for_every_call() {
    // Arrange
    let mock = MockFabricServer::new().await;
    mock.mock_token_endpoint("tenant-1").await;
    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_list_response(vec![], None)))
        .expect(2)
        .mount(&mock.server)
        .await;
    let provider =
        ServicePrincipalTokenProvider::new("tenant-1", "app-1", "secret").with_authority(mock.url());
    let client = FabricClient::new(mock.url(), Arc::new(provider));

    // Act
    for _ in 0..2 {
        tokio_test::assert_ok!(client.request(Method::GET, "/v1/connections", None).await);
    }

    // Assert
    assert_eq!(mock.requests_to("/tenant-1/oauth2/v2.0/token").await.len(), 2);
}

#[tokio::test]
async fn test_auth_failure_stops_control_plane_call() {
    let mock = MockFabricServer::new().await;
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&mock.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/connections"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock.server)
        .await;
    let provider =
        ServicePrincipalTokenProvider::new("tenant-1", "app-1", "secret").with_authority(mock.url());
    let client = FabricClient::new(mock.url(), Arc::new(provider));

    let result = client.request(Method::GET, "/v1/connections", None).await;

    assert!(matches!(result, Err(ref e) if e.is_fatal()));
}
