//! Typed representations of the Fabric resources and copy-job definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of uniquely named control-plane resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Fabric Warehouse (workspace scoped).
    Warehouse,
    /// Shareable cloud connection (tenant scoped).
    Connection,
    /// Copy Job item (workspace scoped).
    CopyJob,
}

impl ResourceKind {
    /// Path segment of the collection endpoint.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Warehouse => "warehouses",
            Self::Connection => "connections",
            Self::CopyJob => "copyJobs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Warehouse => "warehouse",
            Self::Connection => "connection",
            Self::CopyJob => "copy job",
        };
        f.write_str(name)
    }
}

/// Normalized view of a resource as returned by list/get/create calls.
///
/// `id` is absent when a create was accepted but the item is not queryable yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Opaque item id.
    pub id: Option<String>,
    /// Display name, unique per scope.
    pub display_name: Option<String>,
    /// Raw JSON as received.
    pub raw: Value,
}

/// A resource the provisioner found or created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    /// Item id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// True when the resource already existed (or another caller won the race).
    pub reused: bool,
}

/// Dataset location of one side of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// Schema name.
    pub schema: String,
    /// Unqualified table name.
    pub table: String,
}

/// Source side of a copy activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySource {
    /// Source dataset type.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Source dataset location.
    pub dataset_settings: DatasetSettings,
    /// Partitioning hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_option: Option<String>,
}

/// Destination side of a copy activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDestination {
    /// Destination dataset type.
    #[serde(rename = "type")]
    pub destination_type: String,
    /// Destination dataset location.
    pub dataset_settings: DatasetSettings,
    /// Table handling, e.g. `autoCreate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_option: Option<String>,
    /// Write mode, e.g. `Append`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_behavior: Option<String>,
}

/// Column translator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translator {
    /// Translator type, e.g. `TabularTranslator`.
    #[serde(rename = "type")]
    pub translator_type: String,
}

/// Type conversion knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeConversion {
    /// Allow truncation of values that do not fit the destination column.
    pub allow_data_truncation: bool,
    /// Map booleans to numbers.
    pub treat_boolean_as_number: bool,
}

/// Wrapper object the control plane expects around [`TypeConversion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeConversionSettings {
    /// Conversion knobs.
    pub type_conversion: TypeConversion,
}

/// Everything in an activity except its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityProperties {
    /// Source side.
    pub source: ActivitySource,
    /// Destination side.
    pub destination: ActivityDestination,
    /// Stage data through interim storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_staging: Option<bool>,
    /// Column translator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translator: Option<Translator>,
    /// Type conversion settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_conversion_settings: Option<TypeConversionSettings>,
}

/// One table-to-table copy within a copy job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique activity id.
    pub id: String,
    /// Copy settings.
    pub properties: ActivityProperties,
}

impl Activity {
    /// Returns the activity reduced to its wiring: types, dataset settings and
    /// table handling. Extensions (staging, partitioning, translator, type
    /// conversion) are dropped. The destination table is unqualified.
    #[must_use]
    pub fn typed_minimal(&self) -> Self {
        let props = &self.properties;
        Self {
            id: self.id.clone(),
            properties: ActivityProperties {
                source: ActivitySource {
                    source_type: props.source.source_type.clone(),
                    dataset_settings: props.source.dataset_settings.clone(),
                    partition_option: None,
                },
                destination: ActivityDestination {
                    destination_type: props.destination.destination_type.clone(),
                    dataset_settings: DatasetSettings {
                        schema: props.destination.dataset_settings.schema.clone(),
                        table: unqualified_table(&props.destination.dataset_settings.table)
                            .to_string(),
                    },
                    table_option: props.destination.table_option.clone(),
                    write_behavior: props.destination.write_behavior.clone(),
                },
                enable_staging: None,
                translator: None,
                type_conversion_settings: None,
            },
        }
    }

    /// Returns the activity with its destination table unqualified.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut activity = self.clone();
        let table = &mut activity.properties.destination.dataset_settings.table;
        let bare = unqualified_table(table);
        if bare != table.as_str() {
            tracing::debug!("normalizing destination table '{}' -> '{}'", table, bare);
            *table = bare.to_string();
        }
        activity
    }
}

/// Returns the last dot-separated segment of a table identifier.
#[must_use]
pub fn unqualified_table(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Desired copy-job content: property scaffold plus ordered activities.
///
/// Built fresh for every reconciliation; never patched in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyJobDefinition {
    /// `jobMode`, `source`, `destination`, `policy` and anything a template adds.
    pub properties: Map<String, Value>,
    /// Ordered activities.
    pub activities: Vec<Activity>,
}

/// The three candidate definitions walked by the reconciler, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Template plus job mode, no activities.
    Minimal,
    /// Full properties, activities stripped to their wiring.
    TypedMinimal,
    /// Full properties and activities as requested.
    Full,
}

impl StageKind {
    /// All stages in application order.
    pub const ALL: [Self; 3] = [Self::Minimal, Self::TypedMinimal, Self::Full];

    /// One-based position in the walk.
    #[must_use]
    pub const fn ordinal(self) -> usize {
        match self {
            Self::Minimal => 1,
            Self::TypedMinimal => 2,
            Self::Full => 3,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Minimal => "minimal",
            Self::TypedMinimal => "typed-minimal",
            Self::Full => "full",
        };
        f.write_str(name)
    }
}

/// An immutable candidate definition for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Which stage this is.
    pub kind: StageKind,
    /// Content object without `activities`.
    pub content: Map<String, Value>,
    /// Activities to send.
    pub activities: Vec<Activity>,
}

impl Stage {
    /// Content JSON for the first `n` activities.
    #[must_use]
    pub fn content_with_prefix(&self, n: usize) -> Value {
        let mut content = self.content.clone();
        let activities = self.activities[..n.min(self.activities.len())]
            .iter()
            .map(|a| serde_json::to_value(a).unwrap_or(Value::Null))
            .collect();
        content.insert("activities".to_string(), Value::Array(activities));
        Value::Object(content)
    }

    /// Content JSON with every activity.
    #[must_use]
    pub fn content_json(&self) -> Value {
        self.content_with_prefix(self.activities.len())
    }
}

/// State of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Not terminal yet (`Running`, `NotStarted`, ...).
    Running(String),
    /// Completed successfully.
    Succeeded,
    /// Completed with failure.
    Failed,
    /// Cancelled by the service.
    Cancelled,
}

impl OperationStatus {
    /// Parses a `status`/`state` value case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Running(value.to_string()),
        }
    }

    /// True for succeeded, failed and cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running(_))
    }
}
