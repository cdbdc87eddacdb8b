use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::registry::CodeUnit;
use crate::sandbox::{TestOutcome, UnitTester};
use crate::vcs::{CommitOutcome, Committer};

// ---------------------------------------------------------------------------
// Request & report types
// ---------------------------------------------------------------------------

/// A proposed replacement implementation for one code unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub unit: CodeUnit,
    /// Complete replacement source text for the unit's file.
    pub new_source: String,
    pub suggestion_id: Option<String>,
    /// Human-readable change rationale; becomes the commit body.
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOutcome {
    pub status: bool,
    pub message: String,
    pub backup_path: Option<PathBuf>,
}

impl Default for EditOutcome {
    fn default() -> Self {
        Self {
            status: false,
            message: String::new(),
            backup_path: None,
        }
    }
}

/// Present only when testing failed and a revert was attempted (or found to
/// be impossible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertOutcome {
    pub status: bool,
    pub message: String,
}

/// Full audit record of one pipeline run. Exactly one of `revert` / `commit`
/// is populated, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationReport {
    pub overall_status: bool,
    pub message: String,
    pub edit: EditOutcome,
    pub test: Option<TestOutcome>,
    pub revert: Option<RevertOutcome>,
    pub commit: Option<CommitOutcome>,
}

impl ModificationReport {
    fn halted(message: impl Into<String>, edit: EditOutcome) -> Self {
        Self {
            overall_status: false,
            message: message.into(),
            edit,
            test: None,
            revert: None,
            commit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ModificationApplier
// ---------------------------------------------------------------------------

/// The seam the suggestion selector drives: apply one proposed change,
/// returning a structured report. Implementations never return errors;
/// unexpected conditions become failed reports.
#[async_trait]
pub trait ModificationApplier: Send + Sync {
    async fn apply(&self, request: &ModificationRequest) -> ModificationReport;
}

// ---------------------------------------------------------------------------
// ModificationPipeline
// ---------------------------------------------------------------------------

/// Composes backup/edit, sandboxed testing, revert-on-failure, and VCS commit
/// into one transactional-feeling operation over a code unit.
///
/// The `.bak` file for a given module path is owned by one in-flight
/// invocation at a time; callers must serialize concurrent modifications of
/// the same unit (the suggestion selector processes one suggestion at a time,
/// which provides this in practice).
pub struct ModificationPipeline {
    project_root: PathBuf,
    source_ext: String,
    tester: Arc<dyn UnitTester>,
    committer: Arc<dyn Committer>,
}

impl ModificationPipeline {
    pub fn new(
        project_root: impl Into<PathBuf>,
        source_ext: impl Into<String>,
        tester: Arc<dyn UnitTester>,
        committer: Arc<dyn Committer>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            source_ext: source_ext.into(),
            tester,
            committer,
        }
    }

    pub fn project_root(&self) -> &std::path::Path {
        &self.project_root
    }

    /// Run the full pipeline for one request. See the stage-by-stage
    /// semantics on each helper below; the contract is early exit on failure
    /// and `overall_status == true` only when edit, test, and commit all
    /// succeed.
    pub async fn apply(&self, request: &ModificationRequest) -> ModificationReport {
        // --- Stage 1: preconditions ---
        let unit = &request.unit;
        if unit.module_path.trim().is_empty()
            || unit.unit_name.trim().is_empty()
            || request.new_source.trim().is_empty()
        {
            let msg = "modification request is missing module path, unit name, or replacement source".to_string();
            error!("{}", msg);
            return ModificationReport::halted(msg, EditOutcome::default());
        }
        let relative = unit.relative_source_path(&self.source_ext);
        let target = self.project_root.join(&relative);
        if !target.exists() {
            let msg = format!(
                "target file '{}' for module '{}' does not exist",
                target.display(),
                unit.module_path
            );
            error!("{}", msg);
            return ModificationReport::halted(
                msg.clone(),
                EditOutcome {
                    status: false,
                    message: msg,
                    backup_path: None,
                },
            );
        }

        info!(unit = %unit, suggestion_id = request.suggestion_id.as_deref().unwrap_or("-"),
              "applying code modification");

        // --- Stage 2: backup + edit ---
        let backup = backup_path(&target);
        let edit = match std::fs::copy(&target, &backup)
            .map_err(|e| format!("failed to back up '{}': {}", target.display(), e))
            .and_then(|_| {
                std::fs::write(&target, &request.new_source)
                    .map_err(|e| format!("failed to write '{}': {}", target.display(), e))
            }) {
            Ok(()) => EditOutcome {
                status: true,
                message: format!("unit '{}' updated, backup at '{}'", unit, backup.display()),
                backup_path: Some(backup.clone()),
            },
            Err(msg) => {
                error!("{}", msg);
                return ModificationReport::halted(
                    format!("code editing failed: {msg}"),
                    EditOutcome {
                        status: false,
                        message: msg,
                        backup_path: None,
                    },
                );
            }
        };

        // --- Stage 3: sandboxed test ---
        let test = self.tester.test_unit(&self.project_root, unit).await;

        if !test.passed {
            // --- Stage 4: revert from backup ---
            let revert = if backup.exists() {
                match std::fs::rename(&backup, &target) {
                    Ok(()) => RevertOutcome {
                        status: true,
                        message: format!(
                            "reverted '{}' from backup after failed test",
                            target.display()
                        ),
                    },
                    Err(e) => {
                        let msg = format!(
                            "failed to restore '{}' from backup; manual intervention required: {}",
                            target.display(),
                            e
                        );
                        error!("{}", msg);
                        RevertOutcome {
                            status: false,
                            message: msg,
                        }
                    }
                }
            } else {
                let msg = format!(
                    "backup '{}' is missing; cannot revert, manual intervention required",
                    backup.display()
                );
                error!("{}", msg);
                RevertOutcome {
                    status: false,
                    message: msg,
                }
            };

            let message = format!(
                "sandboxed testing of '{}' failed: {} | {}",
                unit, test.notes, revert.message
            );
            return ModificationReport {
                overall_status: false,
                message,
                edit,
                test: Some(test),
                revert: Some(revert),
                commit: None,
            };
        }

        // --- Stage 5: drop backup, then commit ---
        let mut edit = edit;
        if let Err(e) = std::fs::remove_file(&backup) {
            warn!(backup = %backup.display(), error = %e, "could not remove backup file");
        } else {
            edit.backup_path = None;
        }

        let commit = self
            .committer
            .commit_unit(
                &self.project_root,
                unit,
                &relative,
                request.suggestion_id.as_deref(),
                request.rationale.as_deref(),
            )
            .await;

        let (overall_status, message) = if commit.status {
            (
                true,
                format!("modification of '{}' edited, tested, and committed", unit),
            )
        } else {
            // The change stays on disk: it is verified, only uncommitted.
            (
                false,
                format!(
                    "modification of '{}' edited and tested successfully, but the commit failed; \
                     the change remains applied and can be committed manually",
                    unit
                ),
            )
        };

        ModificationReport {
            overall_status,
            message,
            edit,
            test: Some(test),
            revert: None,
            commit: Some(commit),
        }
    }
}

#[async_trait]
impl ModificationApplier for ModificationPipeline {
    async fn apply(&self, request: &ModificationRequest) -> ModificationReport {
        ModificationPipeline::apply(self, request).await
    }
}

/// `<file>.bak` next to the target file.
fn backup_path(target: &std::path::Path) -> PathBuf {
    let mut os = target.as_os_str().to_owned();
    os.push(".bak");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const ORIGINAL: &str = "def word_count(text):\n    return len(text.split())\n";
    const REPLACEMENT: &str = "def word_count(text):\n    return len(text.strip().split())\n";

    struct StaticTester {
        pass: bool,
    }

    #[async_trait]
    impl UnitTester for StaticTester {
        async fn test_unit(&self, _root: &Path, unit: &CodeUnit) -> TestOutcome {
            TestOutcome {
                passed: self.pass,
                stdout: String::new(),
                stderr: String::new(),
                notes: format!("static outcome for {}", unit),
            }
        }
    }

    /// Deletes the backup before failing, to exercise the missing-backup path.
    struct BackupEatingTester;

    #[async_trait]
    impl UnitTester for BackupEatingTester {
        async fn test_unit(&self, root: &Path, unit: &CodeUnit) -> TestOutcome {
            let mut backup = root.join(unit.relative_source_path("py")).into_os_string();
            backup.push(".bak");
            let _ = std::fs::remove_file(PathBuf::from(backup));
            TestOutcome {
                passed: false,
                stdout: String::new(),
                stderr: String::new(),
                notes: "failed after eating the backup".into(),
            }
        }
    }

    struct StubCommitter {
        succeed: bool,
    }

    #[async_trait]
    impl Committer for StubCommitter {
        async fn commit_unit(
            &self,
            _root: &Path,
            unit: &CodeUnit,
            _relative: &Path,
            suggestion_id: Option<&str>,
            rationale: Option<&str>,
        ) -> CommitOutcome {
            if self.succeed {
                let (subject, _) = crate::vcs::commit_message(unit, suggestion_id, rationale);
                CommitOutcome {
                    status: true,
                    commit_message: Some(subject),
                    error: None,
                }
            } else {
                CommitOutcome {
                    status: false,
                    commit_message: None,
                    error: Some("forced commit failure".into()),
                }
            }
        }
    }

    fn setup(tester: Arc<dyn UnitTester>, committer: Arc<dyn Committer>) -> (ModificationPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let tools = dir.path().join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(tools.join("text_utils.py"), ORIGINAL).unwrap();
        let pipeline = ModificationPipeline::new(dir.path(), "py", tester, committer);
        (pipeline, dir)
    }

    fn request() -> ModificationRequest {
        ModificationRequest {
            unit: CodeUnit::new("tools.text_utils", "word_count"),
            new_source: REPLACEMENT.into(),
            suggestion_id: Some("sugg-1".into()),
            rationale: Some("Trim whitespace before splitting.".into()),
        }
    }

    #[tokio::test]
    async fn missing_fields_fail_preconditions() {
        let (pipeline, _dir) = setup(
            Arc::new(StaticTester { pass: true }),
            Arc::new(StubCommitter { succeed: true }),
        );
        let mut req = request();
        req.new_source = "  ".into();
        let report = pipeline.apply(&req).await;
        assert!(!report.overall_status);
        assert!(!report.edit.status);
        assert!(report.test.is_none());
        assert!(report.revert.is_none());
        assert!(report.commit.is_none());
    }

    #[tokio::test]
    async fn missing_target_file_fails_preconditions() {
        let (pipeline, _dir) = setup(
            Arc::new(StaticTester { pass: true }),
            Arc::new(StubCommitter { succeed: true }),
        );
        let mut req = request();
        req.unit = CodeUnit::new("tools.not_there", "f");
        let report = pipeline.apply(&req).await;
        assert!(!report.overall_status);
        assert!(report.message.contains("does not exist"));
        assert!(report.test.is_none());
    }

    #[tokio::test]
    async fn failed_test_restores_file_byte_identical() {
        let (pipeline, dir) = setup(
            Arc::new(StaticTester { pass: false }),
            Arc::new(StubCommitter { succeed: true }),
        );
        let report = pipeline.apply(&request()).await;

        assert!(!report.overall_status);
        assert!(report.edit.status);
        assert!(!report.test.as_ref().unwrap().passed);
        let revert = report.revert.as_ref().expect("revert attempted");
        assert!(revert.status);
        assert!(report.commit.is_none());

        let content = std::fs::read_to_string(dir.path().join("tools/text_utils.py")).unwrap();
        assert_eq!(content, ORIGINAL);
        assert!(!dir.path().join("tools/text_utils.py.bak").exists());
    }

    #[tokio::test]
    async fn missing_backup_reports_manual_intervention() {
        let (pipeline, dir) = setup(
            Arc::new(BackupEatingTester),
            Arc::new(StubCommitter { succeed: true }),
        );
        let report = pipeline.apply(&request()).await;

        assert!(!report.overall_status);
        let revert = report.revert.as_ref().expect("revert recorded");
        assert!(!revert.status);
        assert!(revert.message.contains("manual intervention"));

        // The new code is still on disk; there was nothing to restore from.
        let content = std::fs::read_to_string(dir.path().join("tools/text_utils.py")).unwrap();
        assert_eq!(content, REPLACEMENT);
    }

    #[tokio::test]
    async fn commit_failure_keeps_verified_change() {
        let (pipeline, dir) = setup(
            Arc::new(StaticTester { pass: true }),
            Arc::new(StubCommitter { succeed: false }),
        );
        let report = pipeline.apply(&request()).await;

        assert!(!report.overall_status);
        assert!(report.edit.status);
        assert!(report.test.as_ref().unwrap().passed);
        assert!(report.revert.is_none());
        let commit = report.commit.as_ref().expect("commit attempted");
        assert!(!commit.status);
        assert!(report.message.contains("committed manually"));

        let content = std::fs::read_to_string(dir.path().join("tools/text_utils.py")).unwrap();
        assert_eq!(content, REPLACEMENT);
    }

    #[tokio::test]
    async fn full_success_removes_backup_and_commits() {
        let (pipeline, dir) = setup(
            Arc::new(StaticTester { pass: true }),
            Arc::new(StubCommitter { succeed: true }),
        );
        let report = pipeline.apply(&request()).await;

        assert!(report.overall_status);
        assert!(report.edit.status);
        assert!(report.test.as_ref().unwrap().passed);
        assert!(report.revert.is_none());
        let commit = report.commit.as_ref().unwrap();
        assert!(commit.status);
        assert!(commit
            .commit_message
            .as_deref()
            .unwrap()
            .contains("word_count"));
        assert!(!dir.path().join("tools/text_utils.py.bak").exists());

        let content = std::fs::read_to_string(dir.path().join("tools/text_utils.py")).unwrap();
        assert_eq!(content, REPLACEMENT);
    }
}
