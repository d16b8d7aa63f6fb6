//! End-to-end provisioning: warehouse, source connection, copy job.

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::assembler::{CopyJobAssembler, CopyJobBindings};
use crate::client::FabricClient;
use crate::creator::{CreatorConfig, ResourceCreator};
use crate::error::Result;
use crate::model::{ManagedResource, ResourceKind, Stage};
use crate::reconciler::{build_stages, Reconciler};
use crate::resources::{ConnectionSpec, WarehouseSpec};
use crate::retry::RetryConfig;

/// Placeholder ids used when planning without touching the control plane.
const PLANNED_WAREHOUSE_ID: &str = "<warehouse-id>";
const PLANNED_CONNECTION_ID: &str = "<connection-id>";

/// What to provision.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Target workspace.
    pub workspace_id: String,
    /// Destination warehouse.
    pub warehouse: WarehouseSpec,
    /// Warehouse SQL endpoint written into the copy-job destination, if known.
    pub warehouse_endpoint: Option<String>,
    /// Source connection.
    pub connection: ConnectionSpec,
    /// Copy-job display name.
    pub copy_job_name: String,
    /// Tables to copy, `schema.table` or bare.
    pub source_tables: Vec<String>,
    /// Schema for bare table names.
    pub default_schema: String,
    /// Merge the job's current definition into the typed-minimal and full
    /// stages instead of using the scaffold alone.
    pub use_existing_template: bool,
}

impl ProvisionRequest {
    fn bindings(&self, warehouse_id: &str, connection_id: &str) -> CopyJobBindings {
        CopyJobBindings {
            workspace_id: self.workspace_id.clone(),
            source_connection_id: connection_id.to_string(),
            source_database: Some(self.connection.database.clone()),
            warehouse_id: warehouse_id.to_string(),
            warehouse_endpoint: self.warehouse_endpoint.clone(),
        }
    }
}

/// The three resources a run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOutcome {
    /// Destination warehouse.
    pub warehouse: ManagedResource,
    /// Source connection.
    pub connection: ManagedResource,
    /// Copy job.
    pub copy_job: ManagedResource,
    /// Activities in the applied definition.
    pub activities: usize,
}

/// Wait policies for one run.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Warehouse and connection creation.
    pub creator: CreatorConfig,
    /// Id resolution for copy jobs.
    pub copy_job_lookup: RetryConfig,
    /// Outer loop of definition reconciliation.
    pub reconcile: RetryConfig,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            creator: CreatorConfig::default(),
            copy_job_lookup: RetryConfig::for_copy_job_id_lookup(),
            reconcile: RetryConfig::for_definition_update(),
        }
    }
}

/// Runs provisioning against one control plane.
pub struct Provisioner {
    client: FabricClient,
    options: ProvisionOptions,
    progress: Option<ProgressBar>,
}

impl Provisioner {
    /// Creates a provisioner.
    pub fn new(client: FabricClient, options: ProvisionOptions) -> Self {
        Self {
            client,
            options,
            progress: None,
        }
    }

    /// Reports each step on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Underlying client.
    pub fn client(&self) -> &FabricClient {
        &self.client
    }

    /// Ensures the warehouse, the connection and the copy job exist, then
    /// reconciles the copy job's definition.
    ///
    /// A reused copy job is reconciled too; a matching name says nothing
    /// about its definition.
    ///
    /// # Errors
    ///
    /// The first terminal error of any step.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace_id, copy_job = %request.copy_job_name))]
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome> {
        let scope = self.client.workspace(&request.workspace_id);
        let creator = ResourceCreator::new(&scope, self.options.creator.clone());

        self.step(format!("Ensuring warehouse '{}'", request.warehouse.display_name));
        let warehouse = creator
            .ensure(ResourceKind::Warehouse, &request.warehouse.display_name, || {
                scope.create_warehouse(&request.warehouse)
            })
            .await?;

        self.step(format!("Ensuring connection '{}'", request.connection.display_name));
        let connection = match request.connection.existing_id.as_deref() {
            Some(id) => {
                info!("Using configured connection id {}", id);
                ManagedResource {
                    id: id.to_string(),
                    display_name: request.connection.display_name.clone(),
                    kind: ResourceKind::Connection,
                    reused: true,
                }
            }
            None => {
                creator
                    .ensure(
                        ResourceKind::Connection,
                        &request.connection.display_name,
                        || self.client.create_connection(&request.connection),
                    )
                    .await?
            }
        };

        let assembler = CopyJobAssembler::new(request.default_schema.clone());
        let definition =
            assembler.build(&request.source_tables, &request.bindings(&warehouse.id, &connection.id))?;
        info!("Assembled {} copy activities", definition.activities.len());

        self.step(format!("Ensuring copy job '{}'", request.copy_job_name));
        let job_creator = ResourceCreator::new(
            &scope,
            CreatorConfig {
                name_propagation: self.options.creator.name_propagation.clone(),
                id_lookup: self.options.copy_job_lookup.clone(),
            },
        );
        let copy_job = job_creator
            .ensure(ResourceKind::CopyJob, &request.copy_job_name, || {
                scope.create_copy_job(&request.copy_job_name)
            })
            .await?;

        let current = match scope.get_copy_job_content(&copy_job.id).await {
            Ok(Some(current)) => Some(current),
            Ok(None) => {
                debug!("Copy job {} has no readable definition", copy_job.id);
                None
            }
            Err(e) => {
                warn!("Could not fetch definition of copy job {}: {}", copy_job.id, e);
                None
            }
        };
        let template = if request.use_existing_template {
            if current.is_none() {
                warn!("No existing definition for copy job {}; using scaffold", copy_job.id);
            }
            current.clone()
        } else {
            None
        };

        self.step(format!(
            "Reconciling definition of '{}' ({} activities)",
            request.copy_job_name,
            definition.activities.len()
        ));
        Reconciler::new(&scope, self.options.reconcile.clone())
            .with_current_definition(current)
            .apply(
                &copy_job.id,
                &definition.activities,
                &definition.properties,
                template.as_ref(),
            )
            .await?;

        if let Some(progress) = &self.progress {
            progress.finish_with_message("Provisioning complete");
        }
        info!(
            "Provisioned warehouse {} connection {} copy job {}",
            warehouse.id, connection.id, copy_job.id
        );

        Ok(ProvisionOutcome {
            warehouse,
            connection,
            copy_job,
            activities: definition.activities.len(),
        })
    }

    fn step(&self, message: String) {
        info!("{}", message);
        if let Some(progress) = &self.progress {
            progress.set_message(message);
        }
    }
}

/// Builds the stages a run would apply, without any network call.
///
/// Resource ids not known yet are replaced by placeholders.
///
/// # Errors
///
/// Returns [`crate::Error::Config`] for an unparsable table identifier.
pub fn plan(request: &ProvisionRequest) -> Result<Vec<Stage>> {
    let connection_id = request
        .connection
        .existing_id
        .as_deref()
        .unwrap_or(PLANNED_CONNECTION_ID);
    let definition = CopyJobAssembler::new(request.default_schema.clone()).build(
        &request.source_tables,
        &request.bindings(PLANNED_WAREHOUSE_ID, connection_id),
    )?;
    Ok(build_stages(
        &definition.activities,
        &definition.properties,
        None,
        None,
    ))
}
