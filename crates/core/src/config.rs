//! TOML-based configuration for dlgmerge.
//!
//! Every section is optional; an empty file yields the defaults. The log
//! level can be overridden from the environment via
//! [`AppConfig::resolve_env_overrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::merge::MergeOptions;

/// Environment variable overriding `logging.level`.
pub const LOG_ENV: &str = "DLGMERGE_LOG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Mods to merge when none are given on the command line.
    #[serde(default)]
    pub mods: Vec<ModEntry>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Upper bound on mods built and diffed at the same time (default 4).
    #[serde(default = "default_max_parallel_diffs")]
    pub max_parallel_diffs: usize,

    /// Fail the merge when nodes become unreachable instead of reporting them.
    #[serde(default)]
    pub fail_on_orphans: bool,
}

fn default_max_parallel_diffs() -> usize {
    4
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_parallel_diffs: default_max_parallel_diffs(),
            fail_on_orphans: false,
        }
    }
}

impl MergeConfig {
    pub fn options(&self) -> MergeOptions {
        MergeOptions {
            fail_on_orphans: self.fail_on_orphans,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Pretty-print the merged resource.
    #[serde(default = "default_true")]
    pub pretty: bool,

    /// Where to write the JSON conflict report, if anywhere.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            report_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mods
// ---------------------------------------------------------------------------

/// A mod resource listed in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    /// Mod identifier; defaults to the file stem of `path`.
    #[serde(default)]
    pub id: Option<String>,
    pub path: PathBuf,
    pub priority: u32,
}

impl ModEntry {
    /// The explicit id, or the file stem of the resource path.
    pub fn resolved_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`resolve_env_overrides`](Self::resolve_env_overrides) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!(mods = config.mods.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// Apply overrides from the environment.
    pub fn resolve_env_overrides(&mut self) {
        match std::env::var(LOG_ENV) {
            Ok(level) if !level.is_empty() => {
                debug!(env_name = LOG_ENV, %level, "log level overridden from environment");
                self.logging.level = level;
            }
            Ok(_) => warn!(env_name = LOG_ENV, "env var is set but empty"),
            Err(_) => {}
        }
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("'{}' is not one of {}", self.logging.level, LEVELS.join(", ")),
            });
        }
        if self.merge.max_parallel_diffs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "merge.max_parallel_diffs".into(),
                detail: "must be > 0".into(),
            });
        }

        let mut priorities = std::collections::BTreeMap::new();
        for entry in &self.mods {
            if let Some(other) = priorities.insert(entry.priority, entry.resolved_id()) {
                return Err(ConfigError::InvalidValue {
                    field: "mods.priority".into(),
                    detail: format!(
                        "priority {} is shared by '{}' and '{}'",
                        entry.priority,
                        other,
                        entry.resolved_id()
                    ),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// The config file written by `dlgmerge init`.
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[merge]
max_parallel_diffs = 2
fail_on_orphans = true

[output]
pretty = false
report_path = "out/report.json"

[[mods]]
id = "better-camp"
path = "mods/better_camp.json"
priority = 10

[[mods]]
path = "mods/romance_fix.json"
priority = 20
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.merge.max_parallel_diffs, 2);
        assert!(config.merge.options().fail_on_orphans);
        assert!(!config.output.pretty);
        assert_eq!(config.mods.len(), 2);
        assert_eq!(config.mods[0].resolved_id(), "better-camp");
        assert_eq!(config.mods[1].resolved_id(), "romance_fix");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlgmerge.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.mods[0].priority, 10);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/dlgmerge.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.merge.max_parallel_diffs, 4);
        assert!(!config.merge.fail_on_orphans);
        assert!(config.output.pretty);
        assert!(config.mods.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = AppConfig::default();
        config.merge.max_parallel_diffs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.max_parallel_diffs"
        ));
    }

    #[test]
    fn test_validate_rejects_shared_priority() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.mods[1].priority = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "mods.priority"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var(LOG_ENV, "trace");
        let mut config = AppConfig::default();
        config.resolve_env_overrides();
        assert_eq!(config.logging.level, "trace");
        std::env::remove_var(LOG_ENV);
    }

    #[test]
    fn test_default_toml_parses_back() {
        let text = AppConfig::default_toml().unwrap();
        let config: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.merge.max_parallel_diffs, 4);
    }
}
