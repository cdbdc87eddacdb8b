use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::registry::CodeUnit;

/// Default hard timeout for a sandboxed probe.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// TestOutcome
// ---------------------------------------------------------------------------

/// Result of smoke-testing a modified code unit in isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub stdout: String,
    pub stderr: String,
    pub notes: String,
}

impl TestOutcome {
    fn failure(notes: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            passed: false,
            stdout: String::new(),
            stderr: stderr.into(),
            notes: notes.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitTester
// ---------------------------------------------------------------------------

/// Smoke-tests a code unit after modification. Failures are outcomes, never
/// errors: anything that goes wrong produces a `passed = false` outcome with
/// notes.
#[async_trait]
pub trait UnitTester: Send + Sync {
    async fn test_unit(&self, project_root: &Path, unit: &CodeUnit) -> TestOutcome;
}

// ---------------------------------------------------------------------------
// SandboxRunner
// ---------------------------------------------------------------------------

/// Runs a modified code unit inside a fresh interpreter process.
///
/// The probe prepends the project root to the module search path, imports the
/// target module, and looks up the unit. A unit that takes no arguments is
/// invoked (an exception fails the test); a parameterized unit that imports
/// cleanly passes as "loaded but not called". The probe process is bounded by
/// a hard timeout.
pub struct SandboxRunner {
    interpreter: String,
    timeout: Duration,
}

impl SandboxRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl UnitTester for SandboxRunner {
    async fn test_unit(&self, project_root: &Path, unit: &CodeUnit) -> TestOutcome {
        let root = project_root.to_string_lossy();
        let script = render_probe(&root, &unit.module_path, &unit.unit_name);

        let tmp = match tempfile::tempdir() {
            Ok(tmp) => tmp,
            Err(e) => return TestOutcome::failure(format!("failed to create probe dir: {e}"), ""),
        };
        let script_path = tmp.path().join("unit_probe.py");
        if let Err(e) = std::fs::write(&script_path, &script) {
            return TestOutcome::failure(format!("failed to write probe script: {e}"), "");
        }

        debug!(unit = %unit, interpreter = %self.interpreter, "spawning sandbox probe");
        let output = tokio::process::Command::new(&self.interpreter)
            .arg(&script_path)
            .current_dir(project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let notes = format!(
                    "interpreter '{}' not found for sandboxed test of {}",
                    self.interpreter, unit
                );
                error!("{}", notes);
                return TestOutcome::failure(notes, "interpreter not found");
            }
            Ok(Err(e)) => {
                let notes = format!("failed to spawn sandbox probe for {}: {}", unit, e);
                error!("{}", notes);
                return TestOutcome::failure(notes, e.to_string());
            }
            Err(_) => {
                // Dropping the in-flight future kills the child (kill_on_drop).
                let notes = format!(
                    "sandboxed test of {} timed out after {}s",
                    unit,
                    self.timeout.as_secs()
                );
                error!("{}", notes);
                return TestOutcome::failure(notes, "timeout during execution");
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let passed = output.status.success();
        let notes = derive_notes(unit, passed, output.status.code(), &stdout, &stderr);
        if passed {
            info!(unit = %unit, "sandboxed test passed: {}", notes);
        } else {
            error!(unit = %unit, "sandboxed test failed: {}", notes);
        }
        TestOutcome {
            passed,
            stdout,
            stderr,
            notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Probe rendering
// ---------------------------------------------------------------------------

/// Render the probe script for one unit. String values are JSON-quoted so
/// paths with special characters survive embedding.
fn render_probe(project_root: &str, module_path: &str, unit_name: &str) -> String {
    let root = quote(project_root);
    let module = quote(module_path);
    let unit = quote(unit_name);
    format!(
        r#"import importlib
import inspect
import sys
import traceback

sys.path.insert(0, {root})

try:
    print("importing module " + {module})
    module = importlib.import_module({module})
    unit = getattr(module, {unit})
    sig = inspect.signature(unit)
    if not sig.parameters:
        unit()
        print("unit " + {unit} + " called without arguments")
    else:
        print("unit " + {unit} + " loaded but not called")
except Exception:
    traceback.print_exc()
    sys.exit(1)
"#
    )
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

fn derive_notes(
    unit: &CodeUnit,
    passed: bool,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> String {
    if passed {
        if stdout.contains("called without arguments") {
            format!("no-argument unit '{}' called successfully in sandbox", unit)
        } else if stdout.contains("loaded but not called") {
            format!(
                "unit '{}' takes parameters; loaded successfully in sandbox (not called)",
                unit
            )
        } else {
            format!("sandbox probe completed successfully for '{}'", unit)
        }
    } else {
        let combined = format!("{stdout}\n{stderr}");
        if combined.contains("ModuleNotFoundError") || combined.contains("ImportError") {
            format!(
                "import of '{}' failed in sandbox; the module did not load",
                unit.module_path
            )
        } else {
            format!(
                "sandbox probe for '{}' failed with exit code {}",
                unit,
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )
        }
    }
}
