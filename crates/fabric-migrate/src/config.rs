//! Configuration types for fabric-migrate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembler::DEFAULT_SCHEMA;
use crate::auth::{ServicePrincipalTokenProvider, StaticTokenProvider, TokenProvider, DEFAULT_AUTHORITY};
use crate::client::{FabricClient, LroConfig, DEFAULT_API_BASE_URL};
use crate::creator::CreatorConfig;
use crate::error::{Error, Result};
use crate::provision::{ProvisionOptions, ProvisionRequest};
use crate::resources::{ConnectionSpec, SourceCredentials, WarehouseSpec};
use crate::retry::RetryConfig;
use crate::source::{DiscoveryCache, FileTableSource, StaticTableSource, TableSource};

/// Example configuration written by `fabric-migrate init`.
pub const EXAMPLE_CONFIG: &str = r#"# fabric-migrate configuration
fabric:
  workspace_id: 00000000-0000-0000-0000-000000000000
  # api_base_url: https://api.fabric.microsoft.com

# Credentials for the Fabric control plane. Missing values fall back to
# AZURE_TENANT_ID / AZURE_CLIENT_ID / AZURE_CLIENT_SECRET, or set
# FABRIC_BEARER_TOKEN to use a pre-issued token.
auth:
  tenant_id: ""
  client_id: ""

warehouse:
  name: MigratedWarehouse
  description: Tables migrated from Synapse

connection:
  server: myworkspace.sql.azuresynapse.net
  database: sales
  # existing_id: 11111111-1111-1111-1111-111111111111

copy_job:
  name: SynapseToFabric
  default_schema: dbo
  tables:
    - dbo.Customers
    - dbo.Orders
  # tables_file: tables.txt

options:
  lro_timeout_secs: 1800
  definition_deadline_secs: 420
"#;

/// Main provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Control-plane endpoint and target workspace.
    #[serde(default)]
    pub fabric: FabricConfig,
    /// Control-plane credentials.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Destination warehouse.
    pub warehouse: WarehouseConfig,
    /// Source connection.
    pub connection: ConnectionConfig,
    /// Copy job.
    pub copy_job: CopyJobConfig,
    /// Timeouts and retry budgets.
    #[serde(default)]
    pub options: ProvisionOptionsConfig,
}

/// Fabric endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// REST base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Target workspace id.
    #[serde(default)]
    pub workspace_id: String,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            workspace_id: String::new(),
        }
    }
}

/// Control-plane credentials. Either a bearer token or a service principal.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Entra tenant id.
    pub tenant_id: Option<String>,
    /// Application (client) id.
    pub client_id: Option<String>,
    /// Client secret.
    pub client_secret: Option<String>,
    /// Pre-issued bearer token; takes precedence over the service principal.
    pub bearer_token: Option<String>,
    /// Login authority.
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            bearer_token: None,
            authority_url: default_authority_url(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("authority_url", &self.authority_url)
            .finish()
    }
}

/// Warehouse configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Collation type.
    pub collation_type: Option<String>,
    /// SQL endpoint written into the copy-job destination.
    pub sql_endpoint: Option<String>,
}

/// Source connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Display name; defaults to `server;database`.
    pub display_name: Option<String>,
    /// Synapse SQL endpoint host.
    #[serde(default)]
    pub server: String,
    /// Database name.
    #[serde(default)]
    pub database: String,
    /// Use this connection as-is.
    pub existing_id: Option<String>,
    /// Principal stored on the connection; defaults to the `auth` principal.
    pub credentials: Option<CredentialsConfig>,
}

/// Service principal stored on the source connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Entra tenant id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Copy-job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyJobConfig {
    /// Display name.
    pub name: String,
    /// Schema for bare table names.
    #[serde(default = "default_schema")]
    pub default_schema: String,
    /// Start from the job's current definition.
    #[serde(default)]
    pub use_existing_template: bool,
    /// Tables to copy.
    #[serde(default)]
    pub tables: Vec<String>,
    /// File with one table per line, appended after `tables`.
    pub tables_file: Option<PathBuf>,
}

/// Timeouts and retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionOptionsConfig {
    /// Poll bound for create and getDefinition operations.
    #[serde(default = "default_lro_timeout_secs")]
    pub lro_timeout_secs: u64,
    /// Poll bound for each updateDefinition call.
    #[serde(default = "default_definition_lro_timeout_secs")]
    pub definition_lro_timeout_secs: u64,
    /// Poll interval when the service sends no `Retry-After`.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Wall-clock budget for reconciling a definition.
    #[serde(default = "default_definition_deadline_secs")]
    pub definition_deadline_secs: u64,
    /// Retries while a display name is still reserved.
    #[serde(default = "default_name_propagation_retries")]
    pub name_propagation_retries: u32,
    /// Lookups until a created item becomes queryable.
    #[serde(default = "default_id_lookup_retries")]
    pub id_lookup_retries: u32,
}

impl Default for ProvisionOptionsConfig {
    fn default() -> Self {
        Self {
            lro_timeout_secs: default_lro_timeout_secs(),
            definition_lro_timeout_secs: default_definition_lro_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            definition_deadline_secs: default_definition_deadline_secs(),
            name_propagation_retries: default_name_propagation_retries(),
            id_lookup_retries: default_id_lookup_retries(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_authority_url() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_lro_timeout_secs() -> u64 {
    1800
}

fn default_definition_lro_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_definition_deadline_secs() -> u64 {
    420
}

fn default_name_propagation_retries() -> u32 {
    7
}

fn default_id_lookup_retries() -> u32 {
    19
}

/// Values supplied outside the file (environment, command line). They only
/// fill fields the file leaves empty.
#[derive(Clone, Default)]
pub struct Overrides {
    /// Target workspace id.
    pub workspace_id: Option<String>,
    /// Entra tenant id.
    pub tenant_id: Option<String>,
    /// Application (client) id.
    pub client_id: Option<String>,
    /// Client secret.
    pub client_secret: Option<String>,
    /// Pre-issued bearer token.
    pub bearer_token: Option<String>,
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("workspace_id", &self.workspace_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn fill(target: &mut Option<String>, value: Option<String>) {
    if blank(target.as_ref()) && !blank(value.as_ref()) {
        *target = value;
    }
}

impl ProvisionConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Fills empty fields from `overrides`.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if self.fabric.workspace_id.trim().is_empty() {
            if let Some(ws) = overrides.workspace_id.filter(|w| !w.trim().is_empty()) {
                self.fabric.workspace_id = ws;
            }
        }
        fill(&mut self.auth.tenant_id, overrides.tenant_id);
        fill(&mut self.auth.client_id, overrides.client_id);
        fill(&mut self.auth.client_secret, overrides.client_secret);
        fill(&mut self.auth.bearer_token, overrides.bearer_token);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let url = self.fabric.api_base_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "fabric.api_base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.fabric.workspace_id.trim().is_empty() {
            return Err(Error::Config(
                "fabric.workspace_id is required (or set FABRIC_WORKSPACE_ID)".to_string(),
            ));
        }
        if self.warehouse.name.trim().is_empty() {
            return Err(Error::Config("warehouse.name cannot be empty".to_string()));
        }
        if self.copy_job.name.trim().is_empty() {
            return Err(Error::Config("copy_job.name cannot be empty".to_string()));
        }
        if self.connection.existing_id.is_none()
            && (self.connection.server.trim().is_empty()
                || self.connection.database.trim().is_empty())
        {
            return Err(Error::Config(
                "connection.server and connection.database are required unless connection.existing_id is set"
                    .to_string(),
            ));
        }
        if self.copy_job.tables.is_empty() && self.copy_job.tables_file.is_none() {
            return Err(Error::Config(
                "copy_job.tables or copy_job.tables_file must be provided".to_string(),
            ));
        }
        Ok(())
    }

    /// Token provider for the control plane.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when neither a bearer token nor a complete
    /// service principal is configured.
    pub fn token_provider(&self) -> Result<Arc<dyn TokenProvider>> {
        let auth = &self.auth;
        if let Some(token) = auth.bearer_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Arc::new(StaticTokenProvider::new(token)));
        }
        match (&auth.tenant_id, &auth.client_id, &auth.client_secret) {
            (Some(tenant), Some(client), Some(secret)) => Ok(Arc::new(
                ServicePrincipalTokenProvider::new(tenant, client, secret)
                    .with_authority(auth.authority_url.clone()),
            )),
            _ => Err(Error::Config(
                "auth requires bearer_token or tenant_id, client_id and client_secret".to_string(),
            )),
        }
    }

    /// Operation polling behavior.
    #[must_use]
    pub fn lro_config(&self) -> LroConfig {
        LroConfig {
            default_poll_interval: Duration::from_secs(self.options.poll_interval_secs),
            timeout: Duration::from_secs(self.options.lro_timeout_secs),
            definition_timeout: Duration::from_secs(self.options.definition_lro_timeout_secs),
            ..LroConfig::default()
        }
    }

    /// Retry policies for one run.
    #[must_use]
    pub fn provision_options(&self) -> ProvisionOptions {
        let opts = &self.options;
        ProvisionOptions {
            creator: CreatorConfig {
                name_propagation: RetryConfig {
                    max_retries: opts.name_propagation_retries,
                    ..RetryConfig::for_name_propagation()
                },
                id_lookup: RetryConfig {
                    max_retries: opts.id_lookup_retries,
                    ..RetryConfig::for_id_lookup()
                },
            },
            copy_job_lookup: RetryConfig {
                max_retries: opts.id_lookup_retries,
                ..RetryConfig::for_copy_job_id_lookup()
            },
            reconcile: RetryConfig {
                deadline: Some(Duration::from_secs(opts.definition_deadline_secs)),
                ..RetryConfig::for_definition_update()
            },
        }
    }

    /// Control-plane client.
    ///
    /// # Errors
    ///
    /// See [`Self::token_provider`].
    pub fn client(&self) -> Result<FabricClient> {
        Ok(FabricClient::new(&self.fabric.api_base_url, self.token_provider()?)
            .with_lro_config(self.lro_config()))
    }

    /// Configured table sources, in order.
    #[must_use]
    pub fn table_sources(&self) -> Vec<Box<dyn TableSource>> {
        let mut sources: Vec<Box<dyn TableSource>> = Vec::new();
        if !self.copy_job.tables.is_empty() {
            sources.push(Box::new(StaticTableSource::new(self.copy_job.tables.clone())));
        }
        if let Some(path) = &self.copy_job.tables_file {
            sources.push(Box::new(FileTableSource::new(path)));
        }
        sources
    }

    /// Tables from every source, first occurrence wins.
    ///
    /// # Errors
    ///
    /// Propagates source errors.
    pub async fn resolve_tables(&self, cache: &DiscoveryCache) -> Result<Vec<String>> {
        let mut tables: Vec<String> = Vec::new();
        for source in self.table_sources() {
            for table in cache.tables(source.as_ref()).await? {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }
        Ok(tables)
    }

    /// Builds the provisioning request for `source_tables`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the connection needs credentials and
    /// none are configured.
    pub fn to_request(&self, source_tables: Vec<String>) -> Result<ProvisionRequest> {
        let conn = &self.connection;
        let credentials = match (&conn.credentials, &self.auth) {
            (Some(c), _) => SourceCredentials {
                tenant_id: c.tenant_id.clone(),
                client_id: c.client_id.clone(),
                client_secret: c.client_secret.clone(),
            },
            (
                None,
                AuthConfig {
                    tenant_id: Some(tenant),
                    client_id: Some(client),
                    client_secret: Some(secret),
                    ..
                },
            ) => SourceCredentials {
                tenant_id: tenant.clone(),
                client_id: client.clone(),
                client_secret: secret.clone(),
            },
            (None, _) if conn.existing_id.is_some() => SourceCredentials {
                tenant_id: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
            },
            (None, _) => {
                return Err(Error::Config(
                    "connection.credentials required to create the source connection".to_string(),
                ))
            }
        };

        let display_name = conn
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| ConnectionSpec::default_display_name(&conn.server, &conn.database));

        Ok(ProvisionRequest {
            workspace_id: self.fabric.workspace_id.clone(),
            warehouse: WarehouseSpec {
                display_name: self.warehouse.name.clone(),
                description: self.warehouse.description.clone(),
                collation_type: self.warehouse.collation_type.clone(),
            },
            warehouse_endpoint: self.warehouse.sql_endpoint.clone(),
            connection: ConnectionSpec {
                display_name,
                server: conn.server.clone(),
                database: conn.database.clone(),
                existing_id: conn.existing_id.clone(),
                credentials,
            },
            copy_job_name: self.copy_job.name.clone(),
            source_tables,
            default_schema: self.copy_job.default_schema.clone(),
            use_existing_template: self.copy_job.use_existing_template,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ProvisionConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const MINIMAL: &str = r#"
fabric:
  workspace_id: ws-1
auth:
  tenant_id: t
  client_id: c
  client_secret: s3cr3t
warehouse:
  name: W1
connection:
  server: syn.sql.azuresynapse.net
  database: sales
copy_job:
  name: job
  tables: [dbo.Customers, dbo.Orders]
"#;

    #[test]
    fn test_example_config_parses_and_validates() {
        let config = parse(EXAMPLE_CONFIG);
        assert!(config.validate().is_ok());
        assert_eq!(config.copy_job.tables.len(), 2);
    }

    #[test]
    fn test_config_defaults() {
        let config = parse(MINIMAL);
        assert_eq!(config.fabric.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.auth.authority_url, DEFAULT_AUTHORITY);
        assert_eq!(config.copy_job.default_schema, "dbo");
        assert!(!config.copy_job.use_existing_template);
        assert_eq!(config.options.lro_timeout_secs, 1800);
        assert_eq!(config.options.definition_lro_timeout_secs, 120);
        assert_eq!(config.options.poll_interval_secs, 5);
        assert_eq!(config.options.definition_deadline_secs, 420);
    }

    #[test]
    fn test_validate_rejects_missing_workspace() {
        let mut config = parse(MINIMAL);
        config.fabric.workspace_id = String::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = parse(MINIMAL);
        config.fabric.api_base_url = "ftp://example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_tables() {
        let mut config = parse(MINIMAL);
        config.copy_job.tables.clear();
        assert!(config.validate().is_err());
        config.copy_job.tables_file = Some(PathBuf::from("tables.txt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_existing_connection_needs_no_server() {
        let mut config = parse(MINIMAL);
        config.connection.server = String::new();
        assert!(config.validate().is_err());
        config.connection.existing_id = Some("conn-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_fill_only_missing_values() {
        // Arrange
        let mut config = parse(MINIMAL);
        config.fabric.workspace_id = String::new();
        config.auth.bearer_token = None;

        // Act
        let config = config.with_overrides(Overrides {
            workspace_id: Some("ws-env".to_string()),
            tenant_id: Some("t-env".to_string()),
            bearer_token: Some("tok".to_string()),
            ..Default::default()
        });

        // Assert
        assert_eq!(config.fabric.workspace_id, "ws-env");
        assert_eq!(config.auth.tenant_id.as_deref(), Some("t"));
        assert_eq!(config.auth.bearer_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = parse(MINIMAL);
        config.auth.bearer_token = Some("tok-secret".to_string());
        config.connection.credentials = Some(CredentialsConfig {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: "conn-secret".to_string(),
        });

        let debug = format!("{config:?}");

        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("tok-secret"));
        assert!(!debug.contains("conn-secret"));
    }

    #[test]
    fn test_token_provider_requires_credentials() {
        let mut config = parse(MINIMAL);
        assert!(config.token_provider().is_ok());
        config.auth.client_secret = None;
        assert!(matches!(config.token_provider(), Err(Error::Config(_))));
        config.auth.bearer_token = Some("tok".to_string());
        assert!(config.token_provider().is_ok());
    }

    #[test]
    fn test_to_request() {
        // Arrange
        let config = parse(MINIMAL);

        // Act
        let request = config
            .to_request(vec!["dbo.Customers".to_string()])
            .unwrap();

        // Assert
        assert_eq!(request.workspace_id, "ws-1");
        assert_eq!(request.warehouse.display_name, "W1");
        assert_eq!(request.connection.display_name, "syn.sql.azuresynapse.net;sales");
        assert_eq!(request.connection.credentials.client_secret, "s3cr3t");
        assert_eq!(request.default_schema, "dbo");
    }

    #[test]
    fn test_to_request_without_credentials() {
        let mut config = parse(MINIMAL);
        config.auth.client_secret = None;
        assert!(config.to_request(vec![]).is_err());

        config.connection.existing_id = Some("conn-1".to_string());
        assert!(config.to_request(vec![]).is_ok());
    }

    #[test]
    fn test_provision_options_follow_config() {
        let mut config = parse(MINIMAL);
        config.options.definition_deadline_secs = 60;
        config.options.name_propagation_retries = 2;

        let options = config.provision_options();

        assert_eq!(options.reconcile.deadline, Some(Duration::from_secs(60)));
        assert_eq!(options.creator.name_propagation.max_retries, 2);
        assert_eq!(options.creator.name_propagation.initial_delay, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_resolve_tables_merges_sources() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.txt");
        std::fs::write(&path, "dbo.Orders\n# skip\ndbo.Products\n").unwrap();
        let mut config = parse(MINIMAL);
        config.copy_job.tables_file = Some(path);
        let cache = DiscoveryCache::new();

        // Act
        let tables = config.resolve_tables(&cache).await.unwrap();

        // Assert
        assert_eq!(tables, vec!["dbo.Customers", "dbo.Orders", "dbo.Products"]);
        assert_eq!(cache.len().await, 2);
    }
}
