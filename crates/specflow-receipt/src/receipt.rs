//! The receipt record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Test-run evidence captured at archive time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStats {
    /// Test files added over the change's history
    pub added: u32,
    /// Test files updated over the change's history
    pub updated: u32,
    /// Whether the configured test command exited zero
    pub passed: bool,
}

/// Who performed the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Kind of actor, e.g. `"agent"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Process identity, `pid@hostname`
    pub name: String,
    /// Fixed model/tool identifier for audit trails
    pub model: String,
}

impl Actor {
    /// Actor for the current process
    #[must_use]
    pub fn current(model: impl Into<String>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            kind: "agent".to_string(),
            name: format!("{}@{}", std::process::id(), host),
            model: model.into(),
        }
    }
}

/// Immutable record of a completed archive
///
/// Serialized as `receipt.json` in the change directory; written exactly
/// once and never regenerated — later archive calls read it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// The archived change
    pub slug: String,
    /// Recent commit ids touching the change path
    pub commits: Vec<String>,
    /// Human-readable range descriptor, e.g. `"last-20"`
    pub git_range: String,
    /// Files touched by those commits
    pub files_touched: Vec<String>,
    /// Test-run evidence
    pub tests: TestStats,
    /// When the archive completed
    pub archived_at: DateTime<Utc>,
    /// Who archived
    pub actor: Actor,
    /// Detected versions of the engine and delegated CLIs
    pub tool_versions: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_current_embeds_pid() {
        let actor = Actor::current("specflow-v1");
        assert!(actor.name.starts_with(&std::process::id().to_string()));
        assert!(actor.name.contains('@'));
        assert_eq!(actor.kind, "agent");
    }

    #[test]
    fn receipt_serializes_camel_case() {
        let receipt = Receipt {
            slug: "add-auth".to_string(),
            commits: vec!["abc123".to_string()],
            git_range: "last-1".to_string(),
            files_touched: vec!["proposal.md".to_string()],
            tests: TestStats {
                added: 1,
                updated: 0,
                passed: true,
            },
            archived_at: Utc::now(),
            actor: Actor::current("specflow-v1"),
            tool_versions: BTreeMap::from([("git".to_string(), "2.43.0".to_string())]),
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("\"gitRange\""));
        assert!(json.contains("\"filesTouched\""));
        assert!(json.contains("\"archivedAt\""));
        assert!(json.contains("\"toolVersions\""));
        assert!(json.contains("\"type\":\"agent\""));

        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, receipt);
    }
}
