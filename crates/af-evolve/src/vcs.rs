use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::registry::CodeUnit;

// ---------------------------------------------------------------------------
// CommitOutcome
// ---------------------------------------------------------------------------

/// Result of staging and committing one modified file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub status: bool,
    /// The generated commit message, when a commit was made (or would have
    /// been an idempotent no-op).
    pub commit_message: Option<String>,
    pub error: Option<String>,
}

impl CommitOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            status: false,
            commit_message: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Committer
// ---------------------------------------------------------------------------

/// Stages and commits exactly one modified unit file. Failures are outcomes,
/// never errors.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn commit_unit(
        &self,
        project_root: &Path,
        unit: &CodeUnit,
        relative_path: &Path,
        suggestion_id: Option<&str>,
        rationale: Option<&str>,
    ) -> CommitOutcome;
}

// ---------------------------------------------------------------------------
// GitCommitter
// ---------------------------------------------------------------------------

/// Shells out to the git client binary: `add <relative-path>` then
/// `commit -m <subject> [-m <body>]`, run in the working-copy root.
pub struct GitCommitter {
    binary: String,
}

impl GitCommitter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, root: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
        debug!(binary = %self.binary, ?args, "running vcs command");
        tokio::process::Command::new(&self.binary)
            .args(args)
            .current_dir(root)
            .output()
            .await
    }
}

impl Default for GitCommitter {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl Committer for GitCommitter {
    async fn commit_unit(
        &self,
        project_root: &Path,
        unit: &CodeUnit,
        relative_path: &Path,
        suggestion_id: Option<&str>,
        rationale: Option<&str>,
    ) -> CommitOutcome {
        // Client availability and working-copy checks fail only the commit,
        // never the already-verified code change.
        match self.run(project_root, &["--version"]).await {
            Ok(output) if output.status.success() => {}
            Ok(_) | Err(_) => {
                let msg = format!("vcs client '{}' is not available", self.binary);
                error!("{}", msg);
                return CommitOutcome::failure(msg);
            }
        }
        if !project_root.join(".git").is_dir() {
            let msg = format!(
                "'{}' is not a vcs working copy; cannot commit",
                project_root.display()
            );
            error!("{}", msg);
            return CommitOutcome::failure(msg);
        }

        let rel = relative_path.to_string_lossy();
        let add = match self.run(project_root, &["add", &rel]).await {
            Ok(output) => output,
            Err(e) => return CommitOutcome::failure(format!("failed to run vcs add: {e}")),
        };
        if !add.status.success() {
            let msg = format!(
                "vcs add failed for '{}': {}",
                rel,
                String::from_utf8_lossy(&add.stderr).trim()
            );
            error!("{}", msg);
            return CommitOutcome::failure(msg);
        }

        let (subject, body) = commit_message(unit, suggestion_id, rationale);
        let mut args = vec!["commit", "-m", subject.as_str()];
        if let Some(body) = body.as_deref() {
            args.push("-m");
            args.push(body);
        }
        let commit = match self.run(project_root, &args).await {
            Ok(output) => output,
            Err(e) => return CommitOutcome::failure(format!("failed to run vcs commit: {e}")),
        };

        let full_message = match &body {
            Some(body) => format!("{subject}\n\n{body}"),
            None => subject.clone(),
        };
        if commit.status.success() {
            info!(unit = %unit, "vcs commit successful");
            return CommitOutcome {
                status: true,
                commit_message: Some(full_message),
                error: None,
            };
        }

        let stdout = String::from_utf8_lossy(&commit.stdout);
        let stderr = String::from_utf8_lossy(&commit.stderr);
        if is_nothing_to_commit(&stdout, &stderr) {
            // Idempotent no-op: the file already matches the index.
            warn!(unit = %unit, "vcs reported nothing to commit; treating as success");
            return CommitOutcome {
                status: true,
                commit_message: Some(full_message),
                error: None,
            };
        }

        let msg = format!("vcs commit failed for '{}': {}", rel, stderr.trim());
        error!("{}", msg);
        CommitOutcome::failure(msg)
    }
}

// ---------------------------------------------------------------------------
// Message building
// ---------------------------------------------------------------------------

/// Build the two-part commit message: a fixed-format subject naming the unit,
/// module, and optional suggestion id, plus the rationale as body when it
/// adds anything beyond the subject.
pub(crate) fn commit_message(
    unit: &CodeUnit,
    suggestion_id: Option<&str>,
    rationale: Option<&str>,
) -> (String, Option<String>) {
    let mut subject = format!(
        "Autoforge: modified {} in {}",
        unit.unit_name, unit.module_path
    );
    if let Some(id) = suggestion_id {
        subject.push_str(&format!(" (suggestion {})", id));
    }
    let body = rationale
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .filter(|r| !r.eq_ignore_ascii_case(&subject))
        .map(str::to_owned);
    (subject, body)
}

pub(crate) fn is_nothing_to_commit(stdout: &str, stderr: &str) -> bool {
    stdout.to_lowercase().contains("nothing to commit")
        || stderr.to_lowercase().contains("nothing to commit")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_names_unit_module_and_suggestion() {
        let unit = CodeUnit::new("tools.text_utils", "word_count");
        let (subject, body) = commit_message(&unit, Some("sugg-42"), Some("Handle empty input."));
        assert_eq!(
            subject,
            "Autoforge: modified word_count in tools.text_utils (suggestion sugg-42)"
        );
        assert_eq!(body.as_deref(), Some("Handle empty input."));
    }

    #[test]
    fn body_omitted_when_rationale_matches_subject() {
        let unit = CodeUnit::new("a.b", "f");
        let (subject, body) = commit_message(&unit, None, Some("autoforge: modified f in a.b"));
        assert_eq!(subject, "Autoforge: modified f in a.b");
        assert!(body.is_none());
    }

    #[test]
    fn body_omitted_when_rationale_blank() {
        let unit = CodeUnit::new("a.b", "f");
        let (_, body) = commit_message(&unit, None, Some("   "));
        assert!(body.is_none());
    }

    #[test]
    fn nothing_to_commit_detection() {
        assert!(is_nothing_to_commit(
            "On branch main\nnothing to commit, working tree clean\n",
            ""
        ));
        assert!(is_nothing_to_commit("", "Nothing to commit"));
        assert!(!is_nothing_to_commit("1 file changed", ""));
    }

    #[tokio::test]
    async fn missing_working_copy_fails_commit_only() {
        let tmp = tempfile::tempdir().unwrap();
        let committer = GitCommitter::default();
        let unit = CodeUnit::new("tools.t", "f");
        let outcome = committer
            .commit_unit(
                tmp.path(),
                &unit,
                Path::new("tools/t.py"),
                None,
                None,
            )
            .await;
        assert!(!outcome.status);
        let error = outcome.error.unwrap();
        assert!(
            error.contains("not a vcs working copy") || error.contains("not available"),
            "unexpected error: {error}"
        );
    }
}
