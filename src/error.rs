//! Error taxonomy for the risk scoring pipeline

use serde::Serialize;
use thiserror::Error;

/// A transaction rejected before feature extraction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("transaction id is empty")]
    EmptyTransactionId,

    #[error("amount must be a positive finite number, got {0}")]
    InvalidAmount(f64),

    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),

    #[error("field `{field}` has invalid value {value}")]
    InvalidField { field: &'static str, value: f64 },

    #[error("timestamp {0} is not a valid epoch-millis instant")]
    InvalidTimestamp(i64),
}

/// Inconsistent configuration detected while building a component.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("approve threshold {approve} must be below decline threshold {decline}")]
    ThresholdOrdering { approve: f64, decline: f64 },

    #[error("feature importance table has no entry for `{0}`, which the model references")]
    MissingImportance(String),

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("feature `{0}` is missing from the supplied feature map")]
    MissingFeature(String),

    #[error("parameter `{name}` has invalid value {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Pipeline stage at which an assessment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Validation,
    FeatureExtraction,
    Scoring,
    Explanation,
    Optimization,
    Internal,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Validation => "validation",
            FailureStage::FeatureExtraction => "feature_extraction",
            FailureStage::Scoring => "scoring",
            FailureStage::Explanation => "explanation",
            FailureStage::Optimization => "optimization",
            FailureStage::Internal => "internal",
        }
    }
}

/// Failure of a single risk assessment.
///
/// Callers decide whether to fail closed or open based on [`PipelineError::stage`];
/// the pipeline never substitutes a decision of its own.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid transaction: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not extract features: {0}")]
    FeatureExtraction(String),

    #[error("could not score: {0}")]
    Scoring(String),

    #[error("could not explain: {0}")]
    Explanation(String),

    #[error("could not optimize: {0}")]
    Optimization(String),

    #[error("internal state inconsistency: {0}")]
    StateInconsistency(String),
}

impl PipelineError {
    pub fn stage(&self) -> FailureStage {
        match self {
            PipelineError::Validation(_) => FailureStage::Validation,
            PipelineError::FeatureExtraction(_) => FailureStage::FeatureExtraction,
            PipelineError::Scoring(_) => FailureStage::Scoring,
            PipelineError::Explanation(_) => FailureStage::Explanation,
            PipelineError::Optimization(_) => FailureStage::Optimization,
            PipelineError::StateInconsistency(_) => FailureStage::Internal,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        let err: PipelineError = ValidationError::InvalidAmount(-1.0).into();
        assert_eq!(err.stage(), FailureStage::Validation);
        assert_eq!(
            PipelineError::Scoring("nan".into()).stage().as_str(),
            "scoring"
        );
        assert_eq!(
            PipelineError::StateInconsistency("dup".into()).stage(),
            FailureStage::Internal
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ConfigurationError::ThresholdOrdering {
            approve: 0.7,
            decline: 0.6,
        };
        assert!(err.to_string().contains("0.7"));
        let err = PipelineError::from(ValidationError::EmptyTransactionId);
        assert_eq!(err.to_string(), "invalid transaction: transaction id is empty");
    }
}
