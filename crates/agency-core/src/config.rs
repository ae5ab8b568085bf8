//! Configuration management for the agency workflow engine

use crate::error::{AgencyError, Result};
use agency_types::{CampaignStatus, SystemSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables with this prefix override file values,
/// e.g. `AGENCY__DATA_DIR` or `AGENCY__NOTIFICATIONS__WEBHOOK_URL`
pub const ENV_PREFIX: &str = "AGENCY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub settings: SystemSettings,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub incentive: IncentiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Endpoint receiving workflow events as JSON; events stay in-process when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveConfig {
    /// Campaign statuses whose revenue counts towards incentives
    #[serde(default = "default_eligible_statuses")]
    pub eligible_campaign_statuses: Vec<CampaignStatus>,
}

impl Default for IncentiveConfig {
    fn default() -> Self {
        Self {
            eligible_campaign_statuses: default_eligible_statuses(),
        }
    }
}

// Default functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/agency")
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_eligible_statuses() -> Vec<CampaignStatus> {
    vec![CampaignStatus::Completed, CampaignStatus::Approved]
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            settings: SystemSettings::default(),
            notifications: NotificationConfig::default(),
            incentive: IncentiveConfig::default(),
        }
    }
}

impl AgencyConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgencyError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string, applying environment overrides
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| AgencyError::Config(format!("Failed to parse config: {}", e)))?;

        let config: AgencyConfig = settings
            .try_deserialize()
            .map_err(|e| AgencyError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AgencyError::Config("data_dir is required".to_string()));
        }

        if self.notifications.timeout_secs == 0 {
            return Err(AgencyError::Config(
                "notifications.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(url) = &self.notifications.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AgencyError::Config(format!(
                    "notifications.webhook_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        if self.incentive.eligible_campaign_statuses.is_empty() {
            return Err(AgencyError::Config(
                "incentive.eligible_campaign_statuses must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
