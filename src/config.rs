//! Configuration management for the risk scoring pipeline

use crate::error::ConfigurationError;
use crate::signals::MerchantProfile;
use crate::types::optimization::DecisionThresholds;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub feature_store: FeatureStoreConfig,
    #[serde(default = "default_merchants")]
    pub merchants: Vec<MerchantProfile>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject for assessments when the request carries no reply subject
    pub assessment_subject: String,
    /// Subject for failed assessments
    pub error_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            transaction_subject: "payments.transactions".to_string(),
            assessment_subject: "payments.assessments".to_string(),
            error_subject: "payments.assessment_errors".to_string(),
        }
    }
}

/// Scorer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Adjusted scores below this are approved
    pub approve_threshold: f64,
    /// Adjusted scores at or above this are declined
    pub decline_threshold: f64,
    /// How strongly false-decline risk discounts the fraud probability
    pub false_decline_weight: f64,
    /// Scale applied to each tree's leaf value
    pub learning_rate: f64,
    /// Ensemble margin before any tree contributes
    pub base_margin: f64,
    /// Overrides for the static feature importance priors
    pub feature_importance: Option<HashMap<String, f64>>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            approve_threshold: 0.3,
            decline_threshold: 0.6,
            false_decline_weight: 0.3,
            learning_rate: 0.8,
            base_margin: -3.0,
            feature_importance: None,
        }
    }
}

impl ScoringConfig {
    pub fn thresholds(&self) -> DecisionThresholds {
        DecisionThresholds {
            approve: self.approve_threshold,
            decline: self.decline_threshold,
        }
    }

    /// Reject inconsistent scoring parameters
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        self.thresholds().validate()?;
        if !(0.0..=1.0).contains(&self.false_decline_weight) {
            return Err(ConfigurationError::InvalidParameter {
                name: "false_decline_weight",
                value: self.false_decline_weight,
            });
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "learning_rate",
                value: self.learning_rate,
            });
        }
        if !self.base_margin.is_finite() {
            return Err(ConfigurationError::InvalidParameter {
                name: "base_margin",
                value: self.base_margin,
            });
        }
        Ok(())
    }
}

/// Decision optimizer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Fixed cost of a chargeback on top of the lost amount
    pub chargeback_cost: f64,
    /// Reported with every optimization result
    pub risk_tolerance: f64,
    /// Share of reviewed transactions assumed to end up approved
    pub review_approval_rate: f64,
    /// Share of newly approved revenue assumed legitimate when no labels exist
    pub estimated_recovery_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            chargeback_cost: 25.0,
            risk_tolerance: 0.5,
            review_approval_rate: 0.7,
            estimated_recovery_rate: 0.8,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if !self.chargeback_cost.is_finite() || self.chargeback_cost < 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "chargeback_cost",
                value: self.chargeback_cost,
            });
        }
        for (name, value) in [
            ("risk_tolerance", self.risk_tolerance),
            ("review_approval_rate", self.review_approval_rate),
            ("estimated_recovery_rate", self.estimated_recovery_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

/// Feature store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureStoreConfig {
    /// Maximum remembered transactions per customer
    pub history_capacity: usize,
    /// Account age used when the profile source does not know the customer
    pub default_account_age_days: f64,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            default_account_age_days: 0.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of assessment workers; each customer maps to exactly one
    pub workers: usize,
    /// Messages buffered per worker before the subscription stalls
    pub queue_depth: usize,
    /// Maximum predictions kept for statistics
    pub prediction_log_capacity: usize,
    /// Interval between metrics summaries
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
            prediction_log_capacity: 1000,
            stats_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_merchants() -> Vec<MerchantProfile> {
    vec![
        MerchantProfile::new("amazon", 0.02, 85.0),
        MerchantProfile::new("grocery_mart", 0.01, 45.0),
        MerchantProfile::new("electronics_hub", 0.09, 450.0),
        MerchantProfile::new("travel_direct", 0.06, 780.0),
        MerchantProfile::new("crypto_exchange", 0.15, 1200.0),
        MerchantProfile::new("gift_card_store", 0.18, 150.0),
    ]
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Validate every section that has cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate().context("Invalid [scoring] section")?;
        self.optimizer
            .validate()
            .context("Invalid [optimizer] section")?;
        if self.feature_store.history_capacity == 0 {
            anyhow::bail!("feature_store.history_capacity must be at least 1");
        }
        if self.pipeline.prediction_log_capacity == 0 {
            anyhow::bail!("pipeline.prediction_log_capacity must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            scoring: ScoringConfig::default(),
            optimizer: OptimizerConfig::default(),
            feature_store: FeatureStoreConfig::default(),
            merchants: default_merchants(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.scoring.approve_threshold, 0.3);
        assert_eq!(config.scoring.decline_threshold, 0.6);
        assert_eq!(config.scoring.false_decline_weight, 0.3);
        assert_eq!(config.optimizer.chargeback_cost, 25.0);
        assert_eq!(config.feature_store.history_capacity, 1000);
        assert_eq!(config.pipeline.prediction_log_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let scoring = ScoringConfig {
            approve_threshold: 0.65,
            ..ScoringConfig::default()
        };
        assert!(matches!(
            scoring.validate(),
            Err(ConfigurationError::ThresholdOrdering { .. })
        ));
    }

    #[test]
    fn test_optimizer_rates_rejected() {
        let optimizer = OptimizerConfig {
            review_approval_rate: 1.5,
            ..OptimizerConfig::default()
        };
        assert_eq!(
            optimizer.validate(),
            Err(ConfigurationError::InvalidParameter {
                name: "review_approval_rate",
                value: 1.5
            })
        );
    }

    #[test]
    fn test_load_partial_file() {
        let dir = std::env::temp_dir().join(format!("risk-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[scoring]\napprove_threshold = 0.25\n\n[[merchants]]\nmerchant_id = \"m_1\"\nfraud_rate = 0.2\navg_amount = 300.0\n",
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.scoring.approve_threshold, 0.25);
        assert_eq!(config.scoring.decline_threshold, 0.6);
        assert_eq!(config.merchants.len(), 1);
        assert_eq!(config.merchants[0].merchant_id, "m_1");
        assert_eq!(config.optimizer.chargeback_cost, 25.0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
