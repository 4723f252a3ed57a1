use crate::delegation::DelegationTable;
use crate::error::{ApprovalError, Result};
use crate::paths;
use crate::types::{DispatchMode, SinkKind, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// How approvers are asked: one at a time or all actionable at once.
    #[serde(default)]
    pub dispatch: DispatchMode,
    /// Where notifications are delivered.
    #[serde(default)]
    pub sink: SinkKind,
    /// Lifetime of one-time approval tokens.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u32,
    /// Database file, relative to `.approvals/` unless absolute.
    #[serde(default = "default_database")]
    pub database: String,
    /// delegate → principal
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub delegations: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

fn default_token_ttl_hours() -> u32 {
    168
}

fn default_database() -> String {
    "approvals.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            dispatch: DispatchMode::default(),
            sink: SinkKind::default(),
            token_ttl_hours: default_token_ttl_hours(),
            database: default_database(),
            delegations: HashMap::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ApprovalError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.token_ttl_hours))
    }

    pub fn delegation_table(&self) -> Result<DelegationTable> {
        DelegationTable::from_map(&self.delegations)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.token_ttl_hours == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "token_ttl_hours is 0: every issued token is already expired".into(),
            });
        }

        if self.database.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "database path is empty".into(),
            });
        }

        let mut delegates: Vec<&String> = self.delegations.keys().collect();
        delegates.sort();
        for delegate in delegates {
            let principal = &self.delegations[delegate];
            for id in [delegate, principal] {
                if UserId::parse(id.as_str()).is_err() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Error,
                        message: format!("delegations: '{id}' is not a valid user id"),
                    });
                }
            }
            if delegate == principal {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("delegations: '{delegate}' delegates to themselves"),
                });
            } else if self.delegations.contains_key(principal) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "delegations: '{delegate}' -> '{principal}' is chained; only one hop is followed"
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
