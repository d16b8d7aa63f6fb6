//! Create payloads for warehouses and source connections.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Desired warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSpec {
    /// Display name, unique in the workspace.
    pub display_name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional collation, e.g. `Latin1_General_100_CI_AS_KS_WS_SC_UTF8`.
    #[serde(default)]
    pub collation_type: Option<String>,
}

impl WarehouseSpec {
    /// Creates a spec with only a display name.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            collation_type: None,
        }
    }

    /// Body of `POST /v1/workspaces/{ws}/warehouses`.
    #[must_use]
    pub fn create_body(&self) -> Value {
        let mut body = json!({ "displayName": self.display_name });
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            body["description"] = json!(description);
        }
        if let Some(collation) = self.collation_type.as_deref().filter(|c| !c.is_empty()) {
            body["creationPayload"] = json!({ "collationType": collation });
        }
        body
    }
}

/// Service principal the connection authenticates with against the source.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCredentials {
    /// Entra tenant of the principal.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Desired connection to the Synapse dedicated SQL pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Display name, unique in the tenant.
    pub display_name: String,
    /// SQL endpoint host.
    pub server: String,
    /// Database name.
    pub database: String,
    /// Use this connection id as-is instead of looking up or creating one.
    #[serde(default)]
    pub existing_id: Option<String>,
    /// Credentials stored on the connection.
    pub credentials: SourceCredentials,
}

impl ConnectionSpec {
    /// Display name convention used by the portal for SQL connections.
    #[must_use]
    pub fn default_display_name(server: &str, database: &str) -> String {
        format!("{server};{database}")
    }

    /// Body of `POST /v1/connections`.
    #[must_use]
    pub fn create_body(&self) -> Value {
        let creds = &self.credentials;
        json!({
            "connectivityType": "ShareableCloud",
            "displayName": self.display_name,
            "connectionDetails": {
                "type": "SQL",
                "creationMethod": "SQL",
                "parameters": [
                    {"dataType": "Text", "name": "server", "value": self.server},
                    {"dataType": "Text", "name": "database", "value": self.database},
                ],
            },
            "privacyLevel": "Organizational",
            "credentialDetails": {
                "singleSignOnType": "None",
                "connectionEncryption": "NotEncrypted",
                "credentials": {
                    "credentialType": "ServicePrincipal",
                    "tenantId": creds.tenant_id,
                    "clientId": creds.client_id,
                    "servicePrincipalTenantId": creds.tenant_id,
                    "servicePrincipalClientId": creds.client_id,
                    "servicePrincipalSecret": creds.client_secret,
                },
            },
        })
    }
}
