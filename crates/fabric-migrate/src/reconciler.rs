//! Staged application of copy-job definitions.
//!
//! The update endpoint rejects rich payloads without saying which part it
//! dislikes. Definitions are therefore applied in three stages of increasing
//! richness (see [`StageKind`]), each tried against two endpoints of
//! differing strictness. When a stage with activities fails on both, the
//! activity list is replayed prefix by prefix to isolate the first offending
//! activity. The whole walk runs inside an outer retry loop bounded by a
//! wall-clock deadline.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::{truncate_chars, Error, Result};
use crate::model::{Activity, Stage, StageKind};
use crate::retry::{with_retry, RetryConfig};

/// Max characters of a stage payload written to debug logs.
pub const PAYLOAD_PREVIEW_CHARS: usize = 1200;

/// Max characters of a stage's first activity written to debug logs.
pub const ACTIVITY_PREVIEW_CHARS: usize = 800;

/// The two definition-update endpoints, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateEndpoint {
    /// `POST /v1/workspaces/{ws}/copyJobs/{id}/updateDefinition`.
    CopyJobs,
    /// `POST /v1/workspaces/{ws}/items/{id}/updateDefinition`.
    Items,
}

impl UpdateEndpoint {
    /// Primary first, then secondary.
    pub const ORDER: [Self; 2] = [Self::CopyJobs, Self::Items];
}

impl fmt::Display for UpdateEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyJobs => f.write_str("copyJobs/updateDefinition"),
            Self::Items => f.write_str("items/updateDefinition"),
        }
    }
}

/// Writes a copy-job definition through one of the update endpoints.
#[async_trait]
pub trait DefinitionEndpoints: Send + Sync {
    /// Replaces the job's definition with `content` and waits for completion.
    async fn update_definition(
        &self,
        endpoint: UpdateEndpoint,
        job_id: &str,
        content: &Value,
    ) -> Result<()>;
}

/// Builds the three stages for one reconciliation attempt.
///
/// `current` is the job's definition as the control plane holds it now; the
/// minimal stage keeps its scaffolding and only sets `jobMode`. `template`
/// is an opted-in base for the typed-minimal and full stages: its property
/// keys win over `fallback_properties`. Activities of both are always
/// replaced.
#[must_use]
pub fn build_stages(
    activities: &[Activity],
    fallback_properties: &Map<String, Value>,
    template: Option<&Map<String, Value>>,
    current: Option<&Map<String, Value>>,
) -> Vec<Stage> {
    let mut base = template.cloned().unwrap_or_default();
    base.remove("activities");

    let mut merged_props = properties_of(template);
    for (key, value) in fallback_properties {
        merged_props
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    let job_mode = merged_props
        .get("jobMode")
        .cloned()
        .unwrap_or_else(|| Value::String(crate::assembler::JOB_MODE_BATCH.to_string()));
    let mut minimal_props = properties_of(current);
    minimal_props.insert("jobMode".to_string(), job_mode);
    let mut minimal = current.cloned().unwrap_or_default();
    minimal.remove("activities");
    minimal.insert("properties".to_string(), Value::Object(minimal_props));

    let with_props = |props: Map<String, Value>| {
        let mut content = base.clone();
        content.insert("properties".to_string(), Value::Object(props));
        content
    };

    vec![
        Stage {
            kind: StageKind::Minimal,
            content: minimal,
            activities: Vec::new(),
        },
        Stage {
            kind: StageKind::TypedMinimal,
            content: with_props(merged_props.clone()),
            activities: activities.iter().map(Activity::typed_minimal).collect(),
        },
        Stage {
            kind: StageKind::Full,
            content: with_props(merged_props),
            activities: activities.iter().map(Activity::normalized).collect(),
        },
    ]
}

fn properties_of(content: Option<&Map<String, Value>>) -> Map<String, Value> {
    content
        .and_then(|c| c.get("properties"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Applies definitions through [`DefinitionEndpoints`].
pub struct Reconciler<'a, E: ?Sized> {
    endpoints: &'a E,
    retry: RetryConfig,
    current: Option<Map<String, Value>>,
}

impl<'a, E> Reconciler<'a, E>
where
    E: DefinitionEndpoints + ?Sized,
{
    /// Creates a reconciler whose outer loop follows `retry`.
    pub fn new(endpoints: &'a E, retry: RetryConfig) -> Self {
        Self {
            endpoints,
            retry,
            current: None,
        }
    }

    /// Bases the minimal stage on the job's existing definition.
    #[must_use]
    pub fn with_current_definition(mut self, current: Option<Map<String, Value>>) -> Self {
        self.current = current;
        self
    }

    /// Brings the job's definition to `desired_activities` over
    /// `fallback_properties` (and `template`, when given).
    ///
    /// Every outer attempt rebuilds the stages and restarts at the minimal
    /// stage.
    ///
    /// # Errors
    ///
    /// Fatal errors immediately; otherwise [`Error::Timeout`] or
    /// [`Error::RetriesExhausted`] carrying the last stage failure.
    #[instrument(skip(self, desired_activities, fallback_properties, template), fields(activities = desired_activities.len()))]
    pub async fn apply(
        &self,
        job_id: &str,
        desired_activities: &[Activity],
        fallback_properties: &Map<String, Value>,
        template: Option<&Map<String, Value>>,
    ) -> Result<()> {
        let operation = format!("update definition of copy job {job_id}");
        let this = self;
        let current = self.current.as_ref();
        with_retry(
            &self.retry,
            &operation,
            |e| !e.is_fatal(),
            move |attempt| async move {
                if attempt > 1 {
                    info!("Restarting definition stages (attempt {})", attempt);
                }
                let stages = build_stages(desired_activities, fallback_properties, template, current);
                this.walk(job_id, &stages).await
            },
        )
        .await?;

        info!("Definition of copy job {} applied", job_id);
        Ok(())
    }

    /// Applies the stages in order, skipping one whose payload equals the
    /// previous stage's.
    async fn walk(&self, job_id: &str, stages: &[Stage]) -> Result<()> {
        let mut previous: Option<Value> = None;
        for stage in stages {
            let content = stage.content_json();
            if previous.as_ref() == Some(&content) {
                debug!("stage {} identical to previous; skipped", stage.kind);
                continue;
            }
            info!(
                "Applying definition stage {}/{} ({}, {} activities)",
                stage.kind.ordinal(),
                StageKind::ALL.len(),
                stage.kind,
                stage.activities.len()
            );
            self.apply_stage(job_id, stage, &content).await?;
            previous = Some(content);
        }
        Ok(())
    }

    async fn apply_stage(&self, job_id: &str, stage: &Stage, content: &Value) -> Result<()> {
        log_preview(stage, content);

        let err = match self.try_endpoints(job_id, content).await {
            Ok(endpoint) => {
                debug!("stage {} accepted by {}", stage.kind, endpoint);
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => e,
        };

        if stage.activities.is_empty() {
            return Err(Error::StageRejected {
                stage: stage.kind,
                activity_index: None,
                source: Box::new(err),
            });
        }

        warn!(
            "Stage {} rejected by both endpoints ({}); bisecting {} activities",
            stage.kind,
            err,
            stage.activities.len()
        );
        self.bisect(job_id, stage).await
    }

    /// Replays growing prefixes until one fails. The failing prefix's last
    /// activity is the culprit.
    async fn bisect(&self, job_id: &str, stage: &Stage) -> Result<()> {
        for n in 1..=stage.activities.len() {
            let content = stage.content_with_prefix(n);
            match self.try_endpoints(job_id, &content).await {
                Ok(_) => debug!("stage {} prefix of {} activities accepted", stage.kind, n),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let index = n - 1;
                    warn!(
                        "Stage {} fails once activity index {} (id {}) is included",
                        stage.kind, index, stage.activities[index].id
                    );
                    return Err(Error::StageRejected {
                        stage: stage.kind,
                        activity_index: Some(index),
                        source: Box::new(e),
                    });
                }
            }
        }
        // Every prefix, including the full list, went through.
        info!("Stage {} accepted during bisection", stage.kind);
        Ok(())
    }

    /// Primary endpoint, then secondary. Returns the endpoint that accepted.
    async fn try_endpoints(&self, job_id: &str, content: &Value) -> Result<UpdateEndpoint> {
        let mut last = None;
        for endpoint in UpdateEndpoint::ORDER {
            match self.endpoints.update_definition(endpoint, job_id, content).await {
                Ok(()) => return Ok(endpoint),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{} rejected definition: {}", endpoint, e);
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            Error::ProtocolViolation("no definition endpoint attempted".to_string())
        }))
    }
}

fn log_preview(stage: &Stage, content: &Value) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    debug!(
        "stage {} payload: {}",
        stage.kind,
        truncate_chars(&content.to_string(), PAYLOAD_PREVIEW_CHARS)
    );
    if let Some(first) = content
        .get("activities")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
    {
        debug!(
            "stage {} first activity: {}",
            stage.kind,
            truncate_chars(&first.to_string(), ACTIVITY_PREVIEW_CHARS)
        );
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
