use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.autoforge/config.toml`.
///
/// Every interval, threshold, and cool-down the runtime uses lives here;
/// nothing timing-related is hard-coded elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub vcs: VcsConfig,
}

impl Config {
    /// Load config from `~/.autoforge/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    /// The application data directory (`~/.autoforge`).
    pub fn data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autoforge")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root of the working copy whose code units the agent may modify.
    /// Defaults to the current directory.
    #[serde(default)]
    pub workspace_root: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
            workspace_root: None,
        }
    }
}

fn default_project_name() -> String {
    "autoforge".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the active-task store file. Defaults to
    /// `~/.autoforge/active_tasks.json`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_archive_limit")]
    pub archive_limit: usize,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(path),
            None => Config::data_dir().join("active_tasks.json"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            archive_limit: default_archive_limit(),
        }
    }
}

fn default_archive_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Self-reflection cycle interval (default: 300s).
    #[serde(default = "default_reflection_secs")]
    pub reflection_secs: u64,
    /// Fact-store curation interval (default: 600s).
    #[serde(default = "default_curation_secs")]
    pub curation_secs: u64,
    /// Project-plan execution scan interval (default: 720s).
    #[serde(default = "default_project_scan_secs")]
    pub project_scan_secs: u64,
    /// Long-running-task check-in sweep interval (default: 60s).
    #[serde(default = "default_checkin_secs")]
    pub checkin_secs: u64,
    /// Upper bound on a single loop sleep so a stop request is observed
    /// promptly (default: 10s).
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
    /// Grace period before an in-flight unit is force-cancelled at shutdown
    /// (default: 30s).
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reflection_secs: default_reflection_secs(),
            curation_secs: default_curation_secs(),
            project_scan_secs: default_project_scan_secs(),
            checkin_secs: default_checkin_secs(),
            max_sleep_secs: default_max_sleep_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

fn default_reflection_secs() -> u64 {
    300
}
fn default_curation_secs() -> u64 {
    600
}
fn default_project_scan_secs() -> u64 {
    720
}
fn default_checkin_secs() -> u64 {
    60
}
fn default_max_sleep_secs() -> u64 {
    10
}
fn default_stop_grace_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinConfig {
    /// Age after which an active monitored task is considered long-running
    /// (default: 5 minutes).
    #[serde(default = "default_checkin_threshold_secs")]
    pub threshold_secs: u64,
    /// Minimum spacing between two check-ins for the same task
    /// (default: 15 minutes).
    #[serde(default = "default_checkin_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_checkin_threshold_secs(),
            cooldown_secs: default_checkin_cooldown_secs(),
        }
    }
}

fn default_checkin_threshold_secs() -> u64 {
    5 * 60
}
fn default_checkin_cooldown_secs() -> u64 {
    15 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to probe modified code units (default: `python3`).
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Hard timeout for a sandboxed probe (default: 30s).
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    /// Source-file extension code-unit module paths map onto (default: `py`).
    #[serde(default = "default_source_ext")]
    pub source_ext: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout_secs(),
            source_ext: default_source_ext(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".into()
}
fn default_sandbox_timeout_secs() -> u64 {
    30
}
fn default_source_ext() -> String {
    "py".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Version-control client binary (default: `git`).
    #[serde(default = "default_vcs_binary")]
    pub binary: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            binary: default_vcs_binary(),
        }
    }
}

fn default_vcs_binary() -> String {
    "git".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.scheduler.reflection_secs, 300);
        assert_eq!(cfg.scheduler.max_sleep_secs, 10);
        assert_eq!(cfg.checkin.threshold_secs, 300);
        assert_eq!(cfg.checkin.cooldown_secs, 900);
        assert_eq!(cfg.store.archive_limit, 100);
        assert_eq!(cfg.sandbox.interpreter, "python3");
        assert_eq!(cfg.vcs.binary, "git");
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default();
        let text = cfg.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.scheduler.curation_secs, cfg.scheduler.curation_secs);
        assert_eq!(back.sandbox.timeout_secs, cfg.sandbox.timeout_secs);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = "[scheduler]\nreflection_secs = 5\n";
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.scheduler.reflection_secs, 5);
        assert_eq!(cfg.scheduler.curation_secs, 600);
        assert_eq!(cfg.checkin.threshold_secs, 300);
    }
}
