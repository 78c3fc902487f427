//! Public request and response types
//!
//! Every tool-call response is wrapped in [`ToolResponse`], which stamps the
//! API version and detected tool versions for compatibility tracking.
//! Results are compact: no operation echoes file content back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use specflow_receipt::Receipt;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// API surface version stamped on every response
pub const API_VERSION: &str = "1.0";

/// Envelope carrying compatibility metadata around an operation result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse<T> {
    /// Engine API version
    pub api_version: &'static str,
    /// Detected versions of the engine and delegated CLIs
    pub tool_versions: BTreeMap<String, String>,
    /// The operation result
    #[serde(flatten)]
    pub result: T,
}

impl<T> ToolResponse<T> {
    pub(crate) fn new(tool_versions: BTreeMap<String, String>, result: T) -> Self {
        Self {
            api_version: API_VERSION,
            tool_versions,
            result,
        }
    }
}

/// Input to [`crate::ChangeLifecycleEngine::open`]
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRequest {
    /// Human title for the change
    pub title: String,
    /// Requested change identifier (validated against the slug grammar)
    pub slug: String,
    /// Lease owner; defaults to the engine actor identity
    #[serde(default)]
    pub owner: Option<String>,
    /// Lease TTL seconds; defaults to the configured TTL
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Why the change is being made; lands in the scaffolded proposal
    #[serde(default)]
    pub rationale: Option<String>,
    /// Scaffold template name; defaults to `"default"`
    #[serde(default)]
    pub template: Option<String>,
}

impl OpenRequest {
    /// Minimal request with defaults for the optional fields
    #[must_use]
    pub fn new(title: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            slug: slug.into(),
            owner: None,
            ttl: None,
            rationale: None,
            template: None,
        }
    }

    /// With an explicit owner
    #[inline]
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// With an explicit TTL
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// With a rationale
    #[inline]
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Result of an open call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOutcome {
    /// The validated identifier
    pub slug: String,
    /// Whether the caller now holds the lease (always true on success)
    pub locked: bool,
    /// Lease owner
    pub owner: String,
    /// Absolute change directory path
    pub path: PathBuf,
    /// Whether the change directory was created by this call
    pub created: bool,
    /// Whether any scaffold file or directory was created by this call
    pub scaffolded: bool,
}

/// Result of an archive call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
    /// The validated identifier
    pub slug: String,
    /// Whether the change is archived after this call
    pub archived: bool,
    /// True when an earlier call already archived it (idempotent read)
    pub already_archived: bool,
    /// The receipt; `None` only when receipt generation failed (see warnings)
    pub receipt: Option<Receipt>,
    /// Non-fatal findings from the archive pipeline
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ArchiveWarning>,
}

/// Non-fatal findings attached to a successful archive
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ArchiveWarning {
    /// Receipt generation or persistence failed after a successful archive
    ReceiptFailed {
        /// Stable code `EARCHIVED_RECEIPT_FAILED`
        code: &'static str,
        message: String,
    },
    /// A receipt data source degraded to defaults
    Degraded { message: String },
}

impl ArchiveWarning {
    pub(crate) fn receipt_failed(message: impl Into<String>) -> Self {
        Self::ReceiptFailed {
            code: "EARCHIVED_RECEIPT_FAILED",
            message: message.into(),
        }
    }
}

/// Lifecycle state of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Editable, no valid lease held
    Active,
    /// Editable, a valid lease is held
    Locked,
    /// Terminal: receipt written
    Archived,
}

/// One change in a listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    /// Change identifier
    pub slug: String,
    /// First `#` heading of the proposal, or the slug
    pub title: String,
    /// Current lease owner, if a valid lease is held
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Most recent modification anywhere in the change tree
    pub modified_at: DateTime<Utc>,
    /// Whether `proposal.md` exists
    pub has_proposal: bool,
    /// Whether `tasks.md` exists
    pub has_tasks: bool,
    /// Entries directly under `specs/`
    pub spec_count: usize,
    /// List-marker lines in `tasks.md`
    pub task_count: usize,
    /// Markdown files anywhere under `specs/`
    pub delta_count: usize,
    /// Lifecycle state
    pub status: ChangeStatus,
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePage {
    /// Changes on this page, in stable order
    pub changes: Vec<ChangeSummary>,
    /// Total changes matching the listing, across all pages
    pub total: usize,
    /// Whether another page follows
    pub has_next_page: bool,
    /// Continuation token for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// When this listing was generated
    pub generated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_result() {
        let outcome = OpenOutcome {
            slug: "add-auth".to_string(),
            locked: true,
            owner: "alice".to_string(),
            path: PathBuf::from("/srv/changes/add-auth"),
            created: true,
            scaffolded: true,
        };
        let response = ToolResponse::new(
            BTreeMap::from([("git".to_string(), "2.43.0".to_string())]),
            outcome,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["apiVersion"], API_VERSION);
        assert_eq!(json["toolVersions"]["git"], "2.43.0");
        assert_eq!(json["slug"], "add-auth");
        assert_eq!(json["created"], true);
    }

    #[test]
    fn archive_warning_carries_code() {
        let warning = ArchiveWarning::receipt_failed("disk full");
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["code"], "EARCHIVED_RECEIPT_FAILED");
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChangeStatus::Archived).unwrap(),
            "\"archived\""
        );
    }
}
