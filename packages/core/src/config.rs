//! Node count job configuration

use crate::models::validate_path;
use crate::services::NodeCountError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default traversal root
pub const DEFAULT_ROOT_PATH: &str = "/content/site";

/// Top of every hour, Quartz style
pub const DEFAULT_SCHEDULER_EXPRESSION: &str = "0 0 * * * ?";

/// Configuration for the page node count job
///
/// Missing keys fall back to their defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageNodeCountConfig {
    /// Whether a firing performs any work
    pub enabled: bool,

    /// Path the traversal starts from (e.g. /content/mysite)
    #[serde(rename = "rootPath", alias = "root_path")]
    pub root_path: String,

    /// Cron expression controlling how often the job fires
    #[serde(rename = "scheduler.expression", alias = "scheduler_expression")]
    pub scheduler_expression: String,
}

impl Default for PageNodeCountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_path: DEFAULT_ROOT_PATH.to_string(),
            scheduler_expression: DEFAULT_SCHEDULER_EXPRESSION.to_string(),
        }
    }
}

impl PageNodeCountConfig {
    /// Load configuration from a JSON file
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NodeCountError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeCountError::config_io(path, e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| NodeCountError::invalid_config(format!("{}: {}", path.display(), e)))?;
        config.validate().map_err(NodeCountError::InvalidConfig)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_path(&self.root_path).map_err(|e| format!("rootPath: {}", e))?;

        if self.scheduler_expression.trim().is_empty() {
            return Err("scheduler.expression cannot be empty".to_string());
        }

        Ok(())
    }
}
