//! Business Configuration
//!
//! Eligibility thresholds, pricing tiers, the fee schedule and the standard
//! needs-list folders. Loaded from YAML; the shipped defaults are embedded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loan_types::FeeType;

const DEFAULT_RULES: &str = include_str!("../config/loan_rules.yaml");

/// Environment variable naming a YAML file that replaces the defaults
pub const CONFIG_ENV_VAR: &str = "LOAN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanConfig {
    #[serde(default = "default_prefix")]
    pub loan_number_prefix: String,
    pub eligibility: EligibilityConfig,
    pub pricing: PricingConfig,
    pub fees: FeeSchedule,
    pub needs_list: NeedsListConfig,
}

fn default_prefix() -> String {
    "RPC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    pub min_dscr: Decimal,
    pub max_ltv: Decimal,
    #[serde(default)]
    pub exempt_property_types: Vec<String>,
    #[serde(default)]
    pub exempt_request_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub term_months: u32,
    pub rate_spread: Decimal,
    pub tiers: Vec<PricingTier>,
    #[serde(default)]
    pub property_adjustments: HashMap<String, Decimal>,
    pub origination_points: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTier {
    pub max_ltv: Decimal,
    pub base_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub credit: Decimal,
    pub application: Decimal,
    pub appraisal: Decimal,
    pub underwriting: Decimal,
    pub closing: Decimal,
}

impl FeeSchedule {
    pub fn amount(&self, fee: FeeType) -> Decimal {
        match fee {
            FeeType::Credit => self.credit,
            FeeType::Application => self.application,
            FeeType::Appraisal => self.appraisal,
            FeeType::Underwriting => self.underwriting,
            FeeType::Closing => self.closing,
        }
    }
}

/// How a needs-list item without a category is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFallback {
    /// Only documents explicitly linked to the item count
    Strict,
    /// Every document on the loan counts
    AllLoanDocuments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedsListConfig {
    #[serde(default)]
    pub bypass_enabled: bool,
    #[serde(default = "default_fallback")]
    pub category_fallback: CategoryFallback,
    #[serde(default = "default_recent_hours")]
    pub recent_upload_hours: i64,
    pub standard_folders: Vec<FolderTemplate>,
}

fn default_fallback() -> CategoryFallback {
    CategoryFallback::Strict
}

fn default_recent_hours() -> i64 {
    24
}

/// One of the placeholder folders created with every loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderTemplate {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl LoanConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content)?;
        tracing::info!(
            "Loaded loan config from {:?} ({} standard folders)",
            path,
            config.needs_list.standard_folders.len()
        );
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: LoanConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// `LOAN_CONFIG` if set, otherwise the embedded defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Self::from_yaml(DEFAULT_RULES),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pricing.tiers.is_empty() {
            return Err(ConfigError::Invalid(
                "pricing.tiers must not be empty".to_string(),
            ));
        }
        if self.needs_list.standard_folders.is_empty() {
            return Err(ConfigError::Invalid(
                "needs_list.standard_folders must not be empty".to_string(),
            ));
        }
        if self.needs_list.recent_upload_hours <= 0 {
            return Err(ConfigError::Invalid(
                "needs_list.recent_upload_hours must be positive".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for folder in &self.needs_list.standard_folders {
            if folder.category.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "standard folder '{}' has no category",
                    folder.name
                )));
            }
            if !seen.insert(folder.category.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate standard folder category '{}'",
                    folder.category
                )));
            }
        }
        Ok(())
    }
}

impl Default for LoanConfig {
    fn default() -> Self {
        // Embedded at compile time and parsed in tests
        Self::from_yaml(DEFAULT_RULES).expect("embedded loan_rules.yaml is valid")
    }
}
