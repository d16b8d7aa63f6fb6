//! Bearer credentials for the Fabric control plane.
//!
//! Tokens are requested per call and never cached here; callers that hit an
//! authorization failure retry at a higher level.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{truncate_body, Error, Result};

/// Audience of the Fabric REST API.
pub const FABRIC_AUDIENCE: &str = "https://api.fabric.microsoft.com";

/// Default Microsoft identity platform authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Short-lived, audience-scoped bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of bearer credentials.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtains a credential for `audience`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when no identity can be established.
    async fn get_token(&self, audience: &str) -> Result<Credential>;
}

/// A pre-issued token, e.g. from `FABRIC_BEARER_TOKEN`.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: Credential,
}

impl StaticTokenProvider {
    /// Creates a provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Credential::new(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _audience: &str) -> Result<Credential> {
        if self.token.secret().trim().is_empty() {
            return Err(Error::Auth("static bearer token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// OAuth2 token response from the identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: Option<i64>,
}

/// Service principal using the OAuth2 client-credentials flow.
pub struct ServicePrincipalTokenProvider {
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    http_client: Client,
}

impl fmt::Debug for ServicePrincipalTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipalTokenProvider")
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl ServicePrincipalTokenProvider {
    /// Creates a provider against the public cloud authority.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http_client: crate::client::create_http_client(),
        }
    }

    /// Overrides the authority (sovereign clouds, tests).
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    async fn get_token(&self, audience: &str) -> Result<Credential> {
        let scope = format!("{}/.default", audience.trim_end_matches('/'));
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Token request failed with status {}: {}",
                status,
                truncate_body(&body)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Failed to parse token response: {}", e)))?;

        debug!("Acquired access token for {}", audience);
        Ok(Credential::new(token.access_token))
    }
}
