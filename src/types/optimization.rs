//! Decision optimization data structures

use crate::error::ConfigurationError;
use crate::types::prediction::Decision;
use serde::{Deserialize, Serialize};

/// Outcome of revenue-aware decision optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub transaction_id: String,
    pub amount: f64,
    pub original_decision: Decision,
    pub optimized_decision: Decision,
    /// Carried over from the prediction
    pub confidence: f64,
    pub reasoning: Vec<String>,
    /// Expected net value of approving
    pub expected_value: f64,
    /// Amount at stake if approved, zero when expected value is not positive
    pub potential_revenue: f64,
    pub risk_tolerance: f64,
}

impl OptimizationResult {
    pub fn was_overridden(&self) -> bool {
        self.original_decision != self.optimized_decision
    }
}

/// Score thresholds separating approve / review / decline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Scores below this are approved
    pub approve: f64,
    /// Scores at or above this are declined
    pub decline: f64,
}

impl DecisionThresholds {
    pub fn new(approve: f64, decline: f64) -> Result<Self, ConfigurationError> {
        let thresholds = Self { approve, decline };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [("approve_threshold", self.approve), ("decline_threshold", self.decline)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidParameter { name, value });
            }
        }
        if self.approve >= self.decline {
            return Err(ConfigurationError::ThresholdOrdering {
                approve: self.approve,
                decline: self.decline,
            });
        }
        Ok(())
    }

    /// Map an adjusted score to a decision
    pub fn decide(&self, score: f64) -> Decision {
        if score < self.approve {
            Decision::Approve
        } else if score < self.decline {
            Decision::Review
        } else {
            Decision::Decline
        }
    }
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            approve: 0.3,
            decline: 0.6,
        }
    }
}

/// A historical prediction with its confirmed outcome, used for threshold search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledOutcome {
    pub adjusted_score: f64,
    pub amount: f64,
    pub is_fraud: bool,
}

/// Best thresholds found by grid search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRecommendation {
    pub thresholds: DecisionThresholds,
    pub net_revenue: f64,
    pub samples: usize,
}

/// Business impact of decision overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub total_transactions: usize,
    pub overrides: usize,
    pub false_decline_rate_before: f64,
    pub false_decline_rate_after: f64,
    pub revenue_recovered: f64,
    pub new_fraud_losses: f64,
    pub net_benefit: f64,
    /// True when computed from heuristics rather than ground truth
    pub estimated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_boundaries() {
        let thresholds = DecisionThresholds::default();
        assert_eq!(thresholds.decide(0.2999999), Decision::Approve);
        assert_eq!(thresholds.decide(0.3), Decision::Review);
        assert_eq!(thresholds.decide(0.5999999), Decision::Review);
        assert_eq!(thresholds.decide(0.6), Decision::Decline);
        assert_eq!(thresholds.decide(1.0), Decision::Decline);
    }

    #[test]
    fn test_threshold_ordering() {
        assert!(DecisionThresholds::new(0.2, 0.7).is_ok());
        assert_eq!(
            DecisionThresholds::new(0.6, 0.6),
            Err(ConfigurationError::ThresholdOrdering {
                approve: 0.6,
                decline: 0.6
            })
        );
        assert!(matches!(
            DecisionThresholds::new(-0.1, 0.6),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
    }
}
