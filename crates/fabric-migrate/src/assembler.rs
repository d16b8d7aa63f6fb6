//! Turns source table identifiers into copy-job activities and the property
//! scaffold used when no definition template exists.

use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Activity, ActivityDestination, ActivityProperties, ActivitySource, CopyJobDefinition,
    DatasetSettings, Translator, TypeConversion, TypeConversionSettings,
};

/// Schema assumed for bare table names.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Dataset type reading a Synapse dedicated SQL pool table.
pub const SOURCE_TABLE_TYPE: &str = "AzureSqlDWTable";

/// Dataset type writing a Fabric Warehouse table.
pub const DESTINATION_TABLE_TYPE: &str = "DataWarehouseTable";

/// Default job mode.
pub const JOB_MODE_BATCH: &str = "Batch";

/// Default copy-job policy timeout (12 hours).
pub const DEFAULT_POLICY_TIMEOUT: &str = "0.12:00:00";

/// A source table split into schema and unqualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Schema name.
    pub schema: String,
    /// Table name without schema.
    pub table: String,
}

impl TableRef {
    /// Parses `schema.table`, `table`, or bracketed `[schema].[table]`.
    ///
    /// For identifiers with more than two parts the last two are used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the table part is empty.
    pub fn parse(identifier: &str, default_schema: &str) -> Result<Self> {
        let clean = |s: &str| {
            s.trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim_matches('"')
                .to_string()
        };

        let (schema, table) = match identifier.trim().rsplit_once('.') {
            Some((prefix, table)) => {
                let schema = prefix.rsplit('.').next().unwrap_or(prefix);
                (clean(schema), clean(table))
            }
            None => (String::new(), clean(identifier)),
        };

        if table.is_empty() {
            return Err(Error::Config(format!(
                "invalid source table identifier '{identifier}'"
            )));
        }
        let schema = if schema.is_empty() {
            default_schema.to_string()
        } else {
            schema
        };
        Ok(Self { schema, table })
    }
}

/// Where the copy job reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJobBindings {
    /// Workspace holding the warehouse.
    pub workspace_id: String,
    /// Source connection id.
    pub source_connection_id: String,
    /// Source database name, if the connection needs it spelled out.
    pub source_database: Option<String>,
    /// Destination warehouse id.
    pub warehouse_id: String,
    /// Warehouse SQL endpoint, if known.
    pub warehouse_endpoint: Option<String>,
}

/// Builds copy-job definitions from table lists.
#[derive(Debug, Clone)]
pub struct CopyJobAssembler {
    default_schema: String,
}

impl Default for CopyJobAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl CopyJobAssembler {
    /// Creates an assembler using `default_schema` for bare names.
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
        }
    }

    /// Builds one activity per table, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable identifier.
    pub fn build_activities(&self, source_tables: &[String]) -> Result<Vec<Activity>> {
        source_tables
            .iter()
            .map(|identifier| {
                let table = TableRef::parse(identifier, &self.default_schema)?;
                debug!("activity for {}.{}", table.schema, table.table);
                Ok(table_activity(&table))
            })
            .collect()
    }

    /// Property scaffold used when the job has no definition template.
    #[must_use]
    pub fn fallback_properties(&self, bindings: &CopyJobBindings) -> Map<String, Value> {
        let mut destination_props = json!({
            "workspaceId": bindings.workspace_id,
            "artifactId": bindings.warehouse_id,
        });
        if let Some(endpoint) = &bindings.warehouse_endpoint {
            destination_props["endpoint"] = json!(endpoint);
        }

        let scaffold = json!({
            "jobMode": JOB_MODE_BATCH,
            "source": {
                "type": SOURCE_TABLE_TYPE,
                "connectionSettings": {
                    "type": "AzureSqlDW",
                    "typeProperties": { "database": bindings.source_database },
                    "externalReferences": { "connection": bindings.source_connection_id },
                },
            },
            "destination": {
                "type": DESTINATION_TABLE_TYPE,
                "connectionSettings": {
                    "type": "DataWarehouse",
                    "typeProperties": destination_props,
                },
            },
            "policy": { "timeout": DEFAULT_POLICY_TIMEOUT },
        });
        match scaffold {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Builds the full desired definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable identifier.
    pub fn build(
        &self,
        source_tables: &[String],
        bindings: &CopyJobBindings,
    ) -> Result<CopyJobDefinition> {
        Ok(CopyJobDefinition {
            properties: self.fallback_properties(bindings),
            activities: self.build_activities(source_tables)?,
        })
    }
}

/// Destination mirrors source; no renaming.
fn table_activity(table: &TableRef) -> Activity {
    let dataset = DatasetSettings {
        schema: table.schema.clone(),
        table: table.table.clone(),
    };
    Activity {
        id: Uuid::new_v4().to_string(),
        properties: ActivityProperties {
            source: ActivitySource {
                source_type: SOURCE_TABLE_TYPE.to_string(),
                dataset_settings: dataset.clone(),
                partition_option: Some("None".to_string()),
            },
            destination: ActivityDestination {
                destination_type: DESTINATION_TABLE_TYPE.to_string(),
                dataset_settings: dataset,
                table_option: Some("autoCreate".to_string()),
                write_behavior: None,
            },
            enable_staging: Some(true),
            translator: Some(Translator {
                translator_type: "TabularTranslator".to_string(),
            }),
            type_conversion_settings: Some(TypeConversionSettings {
                type_conversion: TypeConversion {
                    allow_data_truncation: true,
                    treat_boolean_as_number: false,
                },
            }),
        },
    }
}
