//! Prediction, explanation and model metric data structures

use crate::types::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Final action for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Review,
    Decline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Review => "review",
            Decision::Decline => "decline",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a feature pushed the score up or down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    IncreasesRisk,
    DecreasesRisk,
    Neutral,
}

impl ImpactDirection {
    pub fn from_contribution(contribution: f64) -> Self {
        if contribution > 0.0 {
            ImpactDirection::IncreasesRisk
        } else if contribution < 0.0 {
            ImpactDirection::DecreasesRisk
        } else {
            ImpactDirection::Neutral
        }
    }
}

/// Attribution of part of the score to one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
    pub impact: ImpactDirection,
    /// Absolute value of the contribution
    pub importance: f64,
}

/// Human-readable explanation of a prediction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskExplanation {
    /// Largest contributions by absolute value, most important first
    pub top_features: Vec<FeatureContribution>,
    pub risk_factors: Vec<String>,
    pub protective_factors: Vec<String>,
    /// Contribution of every feature in the schema
    pub shap_values: BTreeMap<String, f64>,
}

/// Scorer output for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub transaction_id: String,
    /// Raw ensemble fraud probability after rule adjustments
    pub fraud_probability: f64,
    pub false_decline_risk: f64,
    /// Fraud probability discounted by false-decline risk
    pub adjusted_score: f64,
    /// `adjusted_score * 100`, rounded
    pub risk_score: u8,
    pub decision: Decision,
    pub confidence: f64,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<RiskExplanation>,
}

impl ModelPrediction {
    pub fn with_explanation(mut self, explanation: RiskExplanation) -> Self {
        self.explanation = Some(explanation);
        self
    }
}

/// Confirmed outcome for a previously assessed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub is_fraud: bool,
}

/// Whether model metrics were measured against labels or are static priors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsSource {
    Static,
    Measured,
}

/// Model quality report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc: f64,
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    pub false_decline_rate: f64,
    pub source: MetricsSource,
    pub labeled_samples: usize,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            accuracy: 0.94,
            precision: 0.89,
            recall: 0.87,
            f1_score: 0.88,
            auc: 0.96,
            false_positive_rate: 0.03,
            false_negative_rate: 0.13,
            false_decline_rate: 0.02,
            source: MetricsSource::Static,
            labeled_samples: 0,
        }
    }
}
