//! The change lifecycle orchestrator

use crate::config::{EngineConfig, Template};
use crate::error::EngineError;
use crate::reader::ResourceReader;
use crate::response::{ArchiveOutcome, ArchiveWarning, OpenOutcome, OpenRequest, ToolResponse};
use crate::summary::RECEIPT_FILE_NAME;
use specflow_lock::LockManager;
use specflow_receipt::{CommandRunner, Receipt, ReceiptGenerator, ReceiptOptions, TokioRunner};
use specflow_sandbox::{PathSandbox, Slug};
use specflow_validate::{Rule, StructuralValidator, ValidatorOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Orchestrates open, archive, and read operations over one sandbox root
///
/// Owns the component handles and composes them per operation; all
/// cross-process coordination happens through the lock file and the receipt
/// file, so any number of engines may share the root.
pub struct ChangeLifecycleEngine {
    config: EngineConfig,
    sandbox: PathSandbox,
    locks: LockManager,
    validator: StructuralValidator,
    receipts: ReceiptGenerator,
    runner: Arc<dyn CommandRunner>,
    tool_versions: OnceCell<BTreeMap<String, String>>,
}

impl ChangeLifecycleEngine {
    /// Create an engine over `config.root`
    ///
    /// # Errors
    /// Fails fast when the sandbox root does not exist.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_runner(config, Arc::new(TokioRunner::new()))
    }

    /// Create an engine with a custom execution port (tests, policies)
    pub fn with_runner(
        config: EngineConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, EngineError> {
        let sandbox = PathSandbox::new(&config.root)?;
        let receipts = ReceiptGenerator::new(Arc::clone(&runner), receipt_options(&config));
        Ok(Self {
            validator: StructuralValidator::new(sandbox.clone()),
            sandbox,
            locks: LockManager::new(),
            receipts,
            runner,
            tool_versions: OnceCell::new(),
            config,
        })
    }

    /// Append a custom validation rule; applied on every archive validation
    #[must_use]
    pub fn with_validation_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.validator = self.validator.with_rule(rule);
        self
    }

    /// Read-only listing and streaming access for this root
    #[must_use]
    pub fn reader(&self) -> ResourceReader {
        ResourceReader::new(self.config.clone(), self.sandbox.clone())
    }

    /// The engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a change for editing, creating and scaffolding it if absent
    ///
    /// Idempotent: re-opening with the same (or expired) owner returns the
    /// change's current state instead of erroring. A conflicting valid
    /// lease fails with the holder attached so the caller can wait,
    /// contact them, or reclaim after expiry.
    ///
    /// # Errors
    /// `EBADSLUG`, `EARCHIVED`, `ELOCKED`, `INVALID_TEMPLATE`, or IO.
    pub async fn open(
        &self,
        request: OpenRequest,
    ) -> Result<ToolResponse<OpenOutcome>, EngineError> {
        let slug = Slug::parse(&request.slug)?;
        let template: Template = request.template.as_deref().unwrap_or("default").parse()?;
        let dir = self.sandbox.change_dir(&slug);

        if dir.join(RECEIPT_FILE_NAME).is_file() {
            return Err(EngineError::Archived {
                slug: slug.to_string(),
            });
        }

        let created = !dir.exists();
        if created {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| EngineError::io(&dir, e))?;
        }

        let owner = request
            .owner
            .clone()
            .unwrap_or_else(|| self.config.actor.clone());
        let ttl = request.ttl.unwrap_or(self.config.default_ttl);
        let acquired = self
            .locks
            .acquire(&dir, &owner, ttl)
            .map_err(EngineError::from_lock)?;

        let scaffolded = self.scaffold(&dir, &request, template).await?;

        tracing::info!(
            slug = %slug,
            owner = %owner,
            created,
            scaffolded,
            kind = ?acquired.kind,
            "change opened"
        );
        let outcome = OpenOutcome {
            slug: slug.to_string(),
            locked: true,
            owner,
            path: dir,
            created,
            scaffolded,
        };
        Ok(self.envelope(outcome).await)
    }

    /// Archive a change: validate, lock, run the archive command, persist
    /// the receipt, release the lock
    ///
    /// Idempotent: an existing receipt short-circuits to a pure read — no
    /// validation, locking, or subprocess re-run. A failed archive command
    /// keeps the lock so a retry can reuse it.
    ///
    /// # Errors
    /// `ENOCHANGE`, `EARCHIVED_VALIDATION_FAILED` (with the full violation
    /// list), `ELOCKED`/`EARCHIVED_LOCK_FAILED`, `EARCHIVED_COMMAND_FAILED`.
    pub async fn archive(
        &self,
        slug: &str,
    ) -> Result<ToolResponse<ArchiveOutcome>, EngineError> {
        let slug = Slug::parse(slug)?;
        let dir = self.sandbox.change_dir(&slug);
        if !dir.is_dir() {
            return Err(EngineError::NoChange {
                slug: slug.to_string(),
            });
        }

        let receipt_path = dir.join(RECEIPT_FILE_NAME);
        if receipt_path.is_file() {
            let receipt = read_receipt(&receipt_path)?;
            tracing::debug!(slug = %slug, "archive is an idempotent read");
            let outcome = ArchiveOutcome {
                slug: slug.to_string(),
                archived: true,
                already_archived: true,
                receipt: Some(receipt),
                warnings: Vec::new(),
            };
            return Ok(self.envelope(outcome).await);
        }

        let validation = self.validator.validate(&dir, &ValidatorOptions::default());
        if !validation.is_valid() {
            tracing::warn!(
                slug = %slug,
                errors = validation.errors.len(),
                "archive blocked by validation"
            );
            return Err(EngineError::ValidationFailed(validation));
        }

        self.locks
            .acquire(&dir, &self.config.actor, self.config.default_ttl)
            .map_err(EngineError::from_lock)?;

        let mut warnings = Vec::new();
        let mut receipt = None;
        if self.config.require_tests_pass {
            let (candidate, receipt_warnings) =
                self.receipts.generate(&dir, slug.as_str()).await;
            if !candidate.tests.passed {
                // Lock is kept: the caller fixes tests and retries.
                return Err(EngineError::TestsRequired);
            }
            warnings.extend(degraded(receipt_warnings));
            receipt = Some(candidate);
        }

        self.run_archive_command(&slug).await?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => {
                let (receipt, receipt_warnings) =
                    self.receipts.generate(&dir, slug.as_str()).await;
                warnings.extend(degraded(receipt_warnings));
                receipt
            }
        };

        match persist_receipt(&receipt_path, &receipt) {
            Ok(()) => {
                let _ = self.locks.release(&dir, &self.config.actor);
                tracing::info!(slug = %slug, "change archived");
            }
            Err(e) => {
                // The archive command already succeeded; keep the lock so a
                // retry can persist the receipt without re-contending.
                tracing::warn!(slug = %slug, error = %e, "receipt persistence failed");
                warnings.push(ArchiveWarning::receipt_failed(e.to_string()));
            }
        }

        let outcome = ArchiveOutcome {
            slug: slug.to_string(),
            archived: true,
            already_archived: false,
            receipt: Some(receipt),
            warnings,
        };
        Ok(self.envelope(outcome).await)
    }

    /// Invoke the external archive CLI with the slug as its only appended
    /// argument; no shell is involved
    async fn run_archive_command(&self, slug: &Slug) -> Result<(), EngineError> {
        let Some(command) = &self.config.archive_command else {
            return Ok(());
        };
        let Some((program, base_args)) = command.split_first() else {
            return Ok(());
        };
        let mut args: Vec<String> = base_args.to_vec();
        args.push(slug.to_string());

        let output = self
            .runner
            .run(
                program,
                &args,
                self.sandbox.root(),
                self.config.subprocess_timeout,
            )
            .await
            .map_err(|e| EngineError::ArchiveCommandFailed {
                status: -1,
                stderr: e.to_string(),
            })?;
        if !output.success() {
            tracing::error!(
                program,
                status = output.status,
                "archive command failed, lock retained for retry"
            );
            return Err(EngineError::ArchiveCommandFailed {
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    /// Create missing scaffold members from the template
    async fn scaffold(
        &self,
        dir: &Path,
        request: &OpenRequest,
        template: Template,
    ) -> Result<bool, EngineError> {
        let mut scaffolded = false;

        let proposal = dir.join("proposal.md");
        if !proposal.exists() {
            let body = template.proposal(&request.title, request.rationale.as_deref());
            tokio::fs::write(&proposal, body)
                .await
                .map_err(|e| EngineError::io(&proposal, e))?;
            scaffolded = true;
        }

        let tasks = dir.join("tasks.md");
        if !tasks.exists() {
            tokio::fs::write(&tasks, template.tasks(&request.title))
                .await
                .map_err(|e| EngineError::io(&tasks, e))?;
            scaffolded = true;
        }

        let specs = dir.join("specs");
        if !specs.exists() {
            tokio::fs::create_dir_all(&specs)
                .await
                .map_err(|e| EngineError::io(&specs, e))?;
            scaffolded = true;
        }
        Ok(scaffolded)
    }

    /// Wrap a result with the API version and cached tool versions
    async fn envelope<T>(&self, result: T) -> ToolResponse<T> {
        let versions = self
            .tool_versions
            .get_or_init(|| async {
                let mut warnings = Vec::new();
                let versions = self
                    .receipts
                    .tool_versions(self.sandbox.root(), &mut warnings)
                    .await;
                for warning in &warnings {
                    tracing::debug!(warning = %warning, "tool version probe degraded");
                }
                versions
            })
            .await
            .clone();
        ToolResponse::new(versions, result)
    }
}

fn receipt_options(config: &EngineConfig) -> ReceiptOptions {
    let version_probes = config
        .archive_command
        .as_ref()
        .and_then(|c| c.first())
        .map(|program| vec![program.clone()])
        .unwrap_or_default();
    ReceiptOptions {
        subprocess_timeout: config.subprocess_timeout,
        test_command: config.test_command.clone(),
        version_probes,
        actor_model: config.actor_model.clone(),
        commit_limit: 20,
    }
}

fn degraded(warnings: Vec<specflow_receipt::ReceiptWarning>) -> Vec<ArchiveWarning> {
    warnings
        .into_iter()
        .map(|w| ArchiveWarning::Degraded {
            message: w.to_string(),
        })
        .collect()
}

fn read_receipt(path: &Path) -> Result<Receipt, EngineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| EngineError::ReceiptUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| EngineError::ReceiptUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write the receipt atomically (temp + rename); an existing receipt is
/// never overwritten
fn persist_receipt(path: &Path, receipt: &Receipt) -> Result<(), EngineError> {
    if path.exists() {
        return Ok(());
    }
    let tmp = path.with_extension("json.tmp");
    let write = || -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(receipt).map_err(std::io::Error::other)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    };
    write().map_err(|e| EngineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn engine_at(root: &Path) -> ChangeLifecycleEngine {
        ChangeLifecycleEngine::new(EngineConfig::new(root).with_actor("engine-test")).unwrap()
    }

    #[tokio::test]
    async fn open_creates_and_scaffolds() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());

        let response = engine
            .open(OpenRequest::new("Add auth", "add-auth").with_owner("alice"))
            .await
            .unwrap();
        let outcome = &response.result;

        assert!(outcome.created);
        assert!(outcome.scaffolded);
        assert!(outcome.locked);
        assert_eq!(outcome.owner, "alice");
        assert!(outcome.path.join("proposal.md").is_file());
        assert!(outcome.path.join("tasks.md").is_file());
        assert!(outcome.path.join("specs").is_dir());
        assert_eq!(response.api_version, crate::API_VERSION);
    }

    #[tokio::test]
    async fn open_is_idempotent_for_same_owner() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());

        let first = engine
            .open(OpenRequest::new("Add auth", "add-auth").with_owner("alice"))
            .await
            .unwrap();
        let second = engine
            .open(OpenRequest::new("Add auth", "add-auth").with_owner("alice"))
            .await
            .unwrap();

        assert!(first.result.created);
        assert!(!second.result.created);
        assert!(!second.result.scaffolded);
        assert_eq!(first.result.path, second.result.path);
    }

    #[tokio::test]
    async fn open_conflict_reports_holder() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());

        engine
            .open(OpenRequest::new("Add auth", "add-auth").with_owner("alice"))
            .await
            .unwrap();
        let err = engine
            .open(OpenRequest::new("Add auth", "add-auth").with_owner("bob"))
            .await
            .unwrap_err();

        match err {
            EngineError::Locked(info) => assert_eq!(info.owner, "alice"),
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_rejects_bad_slug_without_touching_disk() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());

        let err = engine
            .open(OpenRequest::new("Escape", "../escape"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EBADSLUG");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn open_rejects_unknown_template() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());

        let mut request = OpenRequest::new("Add auth", "add-auth");
        request.template = Some("fancy".to_string());
        let err = engine.open(request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TEMPLATE");
    }

    #[tokio::test]
    async fn archive_missing_change_is_enochange() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());
        let err = engine.archive("ghost-change").await.unwrap_err();
        assert_eq!(err.code(), "ENOCHANGE");
    }

    #[tokio::test]
    async fn archive_invalid_change_reports_all_violations() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("add-auth")).unwrap();
        let engine = engine_at(root.path());

        let err = engine.archive("add-auth").await.unwrap_err();
        match err {
            EngineError::ValidationFailed(result) => {
                assert!(result.has_error("EBADSHAPE_PROPOSAL_MISSING"));
                assert!(result.has_error("EBADSHAPE_TASKS_MISSING"));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn archive_writes_receipt_and_releases_lock() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());
        engine
            .open(OpenRequest::new("Add auth", "add-auth"))
            .await
            .unwrap();

        let response = engine.archive("add-auth").await.unwrap();
        let outcome = &response.result;
        assert!(outcome.archived);
        assert!(!outcome.already_archived);
        assert!(outcome.receipt.is_some());

        let dir = root.path().join("add-auth");
        assert!(dir.join(RECEIPT_FILE_NAME).is_file());
        assert!(!dir.join(".lock").exists());
    }

    #[tokio::test]
    async fn archive_twice_returns_identical_receipt() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());
        engine
            .open(OpenRequest::new("Add auth", "add-auth"))
            .await
            .unwrap();

        let first = engine.archive("add-auth").await.unwrap();
        let second = engine.archive("add-auth").await.unwrap();

        assert!(!first.result.already_archived);
        assert!(second.result.already_archived);
        assert_eq!(first.result.receipt, second.result.receipt);
    }

    #[tokio::test]
    async fn failed_archive_command_keeps_lock() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(root.path())
            .with_actor("engine-test")
            .with_archive_command(vec!["false".to_string()]);
        let engine = ChangeLifecycleEngine::new(config).unwrap();
        engine
            .open(OpenRequest::new("Add auth", "add-auth"))
            .await
            .unwrap();

        let err = engine.archive("add-auth").await.unwrap_err();
        assert_eq!(err.code(), "EARCHIVED_COMMAND_FAILED");
        assert!(root.path().join("add-auth/.lock").exists());
        assert!(!root.path().join("add-auth").join(RECEIPT_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn open_after_archive_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let engine = engine_at(root.path());
        engine
            .open(OpenRequest::new("Add auth", "add-auth"))
            .await
            .unwrap();
        engine.archive("add-auth").await.unwrap();

        let err = engine
            .open(OpenRequest::new("Add auth", "add-auth"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EARCHIVED");
    }
}
