//! Error types for fabric-migrate.
//!
//! Every variant carries a stable `FMIG-0xx` code. The variants map onto the
//! failure classes of the control plane: fatal credential and protocol errors,
//! name-propagation lag, name conflicts, rejected definition stages and
//! exhausted retry budgets.

use std::time::Duration;

use thiserror::Error;

use crate::model::StageKind;

/// Maximum number of response-body characters kept in an error.
pub const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Result type alias for fabric-migrate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning Fabric resources.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential could not be established (FMIG-001).
    #[error("[FMIG-001] Authentication failed: {0}")]
    Auth(String),

    /// The control plane answered in a shape this client cannot work with (FMIG-002).
    ///
    /// A 202 without `Location`, or an operation body without `status`/`state`.
    #[error("[FMIG-002] Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Display name is still held by a recently deleted item (FMIG-003).
    #[error("[FMIG-003] Display name '{display_name}' not available yet: {body}")]
    NameNotYetAvailable {
        /// Requested display name (may be empty when unknown at parse time).
        display_name: String,
        /// Truncated response body.
        body: String,
    },

    /// Display name already in use (FMIG-004).
    #[error("[FMIG-004] Display name conflict (status={status} url={url}): {body}")]
    Conflict {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Truncated response body.
        body: String,
    },

    /// Control-plane request failed (FMIG-005).
    #[error("[FMIG-005] Fabric API request failed. status={status} url={url} code={} response={body}", .code.as_deref().unwrap_or("-"))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Fabric `errorCode`, when the body carried one.
        code: Option<String>,
        /// Truncated response body.
        body: String,
    },

    /// Long-running operation finished as `failed` or `cancelled` (FMIG-006).
    #[error("[FMIG-006] Fabric operation {url} ended with status '{status}': {body}")]
    OperationFailed {
        /// Operation (poll) URL.
        url: String,
        /// Terminal status reported by the control plane.
        status: String,
        /// Truncated operation body.
        body: String,
    },

    /// A definition stage was rejected by both update endpoints (FMIG-007).
    #[error("[FMIG-007] Definition stage '{stage}' rejected{}: {source}", .activity_index.map(|i| format!(" at activity index {i}")).unwrap_or_default())]
    StageRejected {
        /// Stage that failed.
        stage: StageKind,
        /// Index of the first activity whose inclusion makes the stage fail.
        activity_index: Option<usize>,
        /// Error returned by the secondary endpoint.
        #[source]
        source: Box<Error>,
    },

    /// Deadline exceeded (FMIG-008).
    #[error("[FMIG-008] {operation} timed out after {elapsed:?} ({attempts} attempts){}", .last_error.as_ref().map(|e| format!(": last error: {e}")).unwrap_or_default())]
    Timeout {
        /// Operation name.
        operation: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Wall-clock time spent.
        elapsed: Duration,
        /// Last failure observed, if any.
        last_error: Option<Box<Error>>,
    },

    /// Attempt budget exhausted (FMIG-009).
    #[error("[FMIG-009] {operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation name.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure observed.
        #[source]
        source: Box<Error>,
    },

    /// Configuration error (FMIG-010).
    #[error("[FMIG-010] Configuration error: {0}")]
    Config(String),

    /// HTTP transport error (FMIG-011).
    #[error("[FMIG-011] HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error (FMIG-012).
    #[error("[FMIG-012] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (FMIG-013).
    #[error("[FMIG-013] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (FMIG-014).
    #[error("[FMIG-014] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code (e.g., "FMIG-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "FMIG-001",
            Self::ProtocolViolation(_) => "FMIG-002",
            Self::NameNotYetAvailable { .. } => "FMIG-003",
            Self::Conflict { .. } => "FMIG-004",
            Self::Api { .. } => "FMIG-005",
            Self::OperationFailed { .. } => "FMIG-006",
            Self::StageRejected { .. } => "FMIG-007",
            Self::Timeout { .. } => "FMIG-008",
            Self::RetriesExhausted { .. } => "FMIG-009",
            Self::Config(_) => "FMIG-010",
            Self::Http(_) => "FMIG-011",
            Self::Json(_) => "FMIG-012",
            Self::Yaml(_) => "FMIG-013",
            Self::Io(_) => "FMIG-014",
        }
    }

    /// Returns true if retrying the same call can never help.
    ///
    /// Authentication, protocol and configuration failures mean the client and
    /// the control plane disagree about something no amount of waiting fixes.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth(_) | Self::ProtocolViolation(_) | Self::Config(_)
        )
    }

    /// HTTP status code attached to this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Conflict { status, .. } | Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Truncates a response body to [`MAX_ERROR_BODY_CHARS`] on a char boundary.
#[must_use]
pub fn truncate_body(body: &str) -> String {
    truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS)
}

/// Truncates `text` to `max` characters, appending a marker when cut.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...<truncated>", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
