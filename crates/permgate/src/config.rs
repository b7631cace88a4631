use permgate_policy::{EngineConfig, RoleDefault, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RootError, RootResult};

/// Evaluation budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_ms: u64,

    #[serde(default = "default_collaborator_timeout")]
    pub hierarchy_timeout_ms: u64,

    #[serde(default = "default_collaborator_timeout")]
    pub identity_timeout_ms: u64,
}

fn default_evaluation_timeout() -> u64 {
    5000
}

fn default_collaborator_timeout() -> u64 {
    2000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: default_evaluation_timeout(),
            hierarchy_timeout_ms: default_collaborator_timeout(),
            identity_timeout_ms: default_collaborator_timeout(),
        }
    }
}

/// JSON seed files loaded by the CLI. Unset paths mean "empty".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Array of grants, each optionally carrying an `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions_path: Option<PathBuf>,

    /// Array of `{kind, id, parent}` containment links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_path: Option<PathBuf>,

    /// Array of `{subjectId, memberOf}` group and role memberships.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<PathBuf>,
}

/// Top-level configuration for the permgate binary.
///
/// Loaded from a TOML file (typically `~/.permgate/config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub data: DataConfig,

    /// Baseline actions per role, consulted when no stored permission applies.
    #[serde(default)]
    pub defaults: Vec<RoleDefault>,
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl RootConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: RootConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        let budgets = [
            ("evaluation_timeout_ms", self.engine.evaluation_timeout_ms),
            ("hierarchy_timeout_ms", self.engine.hierarchy_timeout_ms),
            ("identity_timeout_ms", self.engine.identity_timeout_ms),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(RootError::Config(format!("{} must be > 0", name)));
            }
        }
        for (name, value) in &budgets[1..] {
            if *value > self.engine.evaluation_timeout_ms {
                return Err(RootError::Config(format!(
                    "{} ({}) exceeds evaluation_timeout_ms ({})",
                    name, value, self.engine.evaluation_timeout_ms
                )));
            }
        }
        for default in &self.defaults {
            if default.role.as_str().is_empty() {
                return Err(RootError::Config("defaults: role must not be empty".into()));
            }
            if default.actions.is_empty() {
                return Err(RootError::Config(format!(
                    "defaults: role '{}' lists no actions",
                    default.role
                )));
            }
        }
        Ok(())
    }

    /// The engine's view of this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timeouts: TimeoutConfig {
                evaluation_timeout_ms: self.engine.evaluation_timeout_ms,
                hierarchy_timeout_ms: self.engine.hierarchy_timeout_ms,
                identity_timeout_ms: self.engine.identity_timeout_ms,
            },
            role_defaults: self.defaults.clone(),
        }
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".permgate/config.toml")
    }
}
