//! Revenue-aware decision optimization.
//!
//! Overrides threshold decisions when expected value and false-decline risk
//! say the default would turn away profitable legitimate customers, and
//! searches for thresholds that maximize simulated net revenue.

use crate::config::OptimizerConfig;
use crate::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::types::features::Feature;
use crate::types::optimization::{
    DecisionThresholds, LabeledOutcome, OptimizationMetrics, OptimizationResult,
    ThresholdRecommendation,
};
use crate::types::prediction::{Decision, GroundTruth, ModelPrediction};
use crate::types::transaction::Transaction;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Turns predictions into final decisions
#[derive(Debug, Clone)]
pub struct DecisionOptimizer {
    config: OptimizerConfig,
}

impl DecisionOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Net value of approving: legitimate revenue minus expected fraud loss
    pub fn expected_value(amount: f64, fraud_probability: f64, chargeback_cost: f64) -> f64 {
        (1.0 - fraud_probability) * amount - fraud_probability * (amount + chargeback_cost)
    }

    /// Decide whether to override the scorer's decision
    pub fn optimize(
        &self,
        transaction: &Transaction,
        prediction: &ModelPrediction,
    ) -> PipelineResult<OptimizationResult> {
        if transaction.transaction_id != prediction.transaction_id {
            return Err(PipelineError::Optimization(format!(
                "prediction {} does not belong to transaction {}",
                prediction.transaction_id, transaction.transaction_id
            )));
        }
        let p = prediction.fraud_probability;
        let fdr = prediction.false_decline_risk;
        if !p.is_finite() || !fdr.is_finite() || !transaction.amount.is_finite() {
            return Err(PipelineError::Optimization(format!(
                "non-finite inputs for transaction {}",
                transaction.transaction_id
            )));
        }

        let ev = Self::expected_value(transaction.amount, p, self.config.chargeback_cost);
        let original = prediction.decision;
        let mut optimized = original;

        let mut reasoning = vec![
            format!("Original decision: {}", original.as_str().to_uppercase()),
            format!("Fraud probability: {:.1}%", p * 100.0),
            format!("False decline risk: {:.1}%", fdr * 100.0),
            if ev > 0.0 {
                format!("Expected value of approving is positive ({:+.2})", ev)
            } else {
                format!("Expected value of approving is not positive ({:+.2})", ev)
            },
        ];

        match original {
            Decision::Approve => {}
            Decision::Decline => {
                if fdr > 0.6 && ev > 0.0 {
                    optimized = Decision::Review;
                    reasoning.push(
                        "High false decline risk with positive expected value: escalating to review"
                            .to_string(),
                    );
                }
                if fdr > 0.8 && p < 0.4 {
                    optimized = Decision::Approve;
                    reasoning.push(
                        "Very high false decline risk with low fraud probability: approving to recover revenue"
                            .to_string(),
                    );
                }
            }
            Decision::Review => {
                if p < 0.35 && prediction.confidence > 0.8 {
                    optimized = Decision::Approve;
                    reasoning.push(
                        "Low fraud probability with high confidence: approving without review"
                            .to_string(),
                    );
                }
                if p > 0.7 {
                    optimized = Decision::Decline;
                    reasoning.push("High fraud probability: declining instead of review".to_string());
                }
            }
        }

        if optimized == original {
            reasoning.push(format!(
                "No override applied: {} confirmed",
                original.as_str().to_uppercase()
            ));
        }

        let features = &prediction.features;
        if features.get(Feature::AccountAgeDays) > 0.5 {
            reasoning.push("Established customer account".to_string());
        }
        if features.get(Feature::TxnCount7d) > 0.3 {
            reasoning.push("Active customer with regular transactions".to_string());
        }
        if features.flag(Feature::IpCountryMatch) && features.flag(Feature::BillingShippingMatch) {
            reasoning.push("Location verified".to_string());
        }

        debug!(
            transaction_id = %transaction.transaction_id,
            original = %original,
            optimized = %optimized,
            expected_value = ev,
            "Decision optimized"
        );

        Ok(OptimizationResult {
            transaction_id: transaction.transaction_id.clone(),
            amount: transaction.amount,
            original_decision: original,
            optimized_decision: optimized,
            confidence: prediction.confidence,
            reasoning,
            expected_value: ev,
            potential_revenue: if ev > 0.0 { transaction.amount } else { 0.0 },
            risk_tolerance: self.config.risk_tolerance,
        })
    }

    /// Optimize aligned transactions and predictions, preserving order
    pub fn batch_optimize(
        &self,
        transactions: &[Transaction],
        predictions: &[ModelPrediction],
    ) -> PipelineResult<Vec<OptimizationResult>> {
        if transactions.len() != predictions.len() {
            return Err(PipelineError::Optimization(format!(
                "{} transactions but {} predictions",
                transactions.len(),
                predictions.len()
            )));
        }
        transactions
            .par_iter()
            .zip(predictions.par_iter())
            .map(|(tx, prediction)| self.optimize(tx, prediction))
            .collect()
    }

    /// Simulated net revenue of one labelled outcome under the given thresholds
    fn simulated_revenue(&self, outcome: &LabeledOutcome, thresholds: &DecisionThresholds) -> f64 {
        let loss = outcome.amount + self.config.chargeback_cost;
        match thresholds.decide(outcome.adjusted_score) {
            Decision::Approve if outcome.is_fraud => -loss,
            Decision::Approve => outcome.amount,
            Decision::Review if outcome.is_fraud => -(1.0 - self.config.review_approval_rate) * loss,
            Decision::Review => self.config.review_approval_rate * outcome.amount,
            Decision::Decline => 0.0,
        }
    }

    /// Grid search over approve in [0.20, 0.40] and decline in [0.50, 0.70], step 0.05.
    ///
    /// Returns `current` unchanged when there is no history.
    pub fn optimize_thresholds(
        &self,
        history: &[LabeledOutcome],
        current: DecisionThresholds,
    ) -> ThresholdRecommendation {
        if history.is_empty() {
            return ThresholdRecommendation {
                thresholds: current,
                net_revenue: 0.0,
                samples: 0,
            };
        }

        let mut best: Option<ThresholdRecommendation> = None;
        for a in 0..=4 {
            for d in 0..=4 {
                let thresholds = DecisionThresholds {
                    approve: (20 + 5 * a) as f64 / 100.0,
                    decline: (50 + 5 * d) as f64 / 100.0,
                };
                let net_revenue: f64 = history
                    .iter()
                    .map(|outcome| self.simulated_revenue(outcome, &thresholds))
                    .sum();

                if best.map_or(true, |b| net_revenue > b.net_revenue) {
                    best = Some(ThresholdRecommendation {
                        thresholds,
                        net_revenue,
                        samples: history.len(),
                    });
                }
            }
        }

        let best = best.unwrap_or(ThresholdRecommendation {
            thresholds: current,
            net_revenue: 0.0,
            samples: history.len(),
        });
        debug!(
            approve = best.thresholds.approve,
            decline = best.thresholds.decline,
            net_revenue = best.net_revenue,
            samples = best.samples,
            "Threshold search complete"
        );
        best
    }

    /// Business impact of overrides.
    ///
    /// With ground truth the figures are measured over the labelled results.
    /// Without it, a fixed share of newly approved revenue is assumed recovered
    /// and the rest lost to fraud, every non-approval counts as a potential
    /// false decline, and the result is flagged as an estimate.
    pub fn calculate_optimization_metrics(
        &self,
        results: &[OptimizationResult],
        ground_truth: Option<&HashMap<String, GroundTruth>>,
    ) -> OptimizationMetrics {
        if let Some(labels) = ground_truth {
            let labelled: Vec<(&OptimizationResult, GroundTruth)> = results
                .iter()
                .filter_map(|r| labels.get(&r.transaction_id).map(|g| (r, *g)))
                .collect();
            if !labelled.is_empty() {
                return self.measured_metrics(&labelled);
            }
        }
        self.estimated_metrics(results)
    }

    fn measured_metrics(&self, labelled: &[(&OptimizationResult, GroundTruth)]) -> OptimizationMetrics {
        let n = labelled.len() as f64;
        let mut declined_before = 0usize;
        let mut declined_after = 0usize;
        let mut revenue_recovered = 0.0;
        let mut new_fraud_losses = 0.0;

        for (result, truth) in labelled {
            let before_approved = result.original_decision == Decision::Approve;
            let after_approved = result.optimized_decision == Decision::Approve;
            if !truth.is_fraud && !before_approved {
                declined_before += 1;
            }
            if !truth.is_fraud && !after_approved {
                declined_after += 1;
            }
            if !before_approved && after_approved && !truth.is_fraud {
                revenue_recovered += result.amount;
            }
            if result.original_decision == Decision::Decline && after_approved && truth.is_fraud {
                new_fraud_losses += result.amount + self.config.chargeback_cost;
            }
        }

        OptimizationMetrics {
            total_transactions: labelled.len(),
            overrides: labelled.iter().filter(|(r, _)| r.was_overridden()).count(),
            false_decline_rate_before: declined_before as f64 / n,
            false_decline_rate_after: declined_after as f64 / n,
            revenue_recovered,
            new_fraud_losses,
            net_benefit: revenue_recovered - new_fraud_losses,
            estimated: false,
        }
    }

    fn estimated_metrics(&self, results: &[OptimizationResult]) -> OptimizationMetrics {
        let n = results.len();
        let rate = |count: usize| if n > 0 { count as f64 / n as f64 } else { 0.0 };

        let newly_approved: f64 = results
            .iter()
            .filter(|r| {
                r.original_decision != Decision::Approve
                    && r.optimized_decision == Decision::Approve
            })
            .map(|r| r.amount)
            .sum();
        let revenue_recovered = newly_approved * self.config.estimated_recovery_rate;
        let new_fraud_losses = newly_approved * (1.0 - self.config.estimated_recovery_rate);

        OptimizationMetrics {
            total_transactions: n,
            overrides: results.iter().filter(|r| r.was_overridden()).count(),
            false_decline_rate_before: rate(
                results
                    .iter()
                    .filter(|r| r.original_decision != Decision::Approve)
                    .count(),
            ),
            false_decline_rate_after: rate(
                results
                    .iter()
                    .filter(|r| r.optimized_decision != Decision::Approve)
                    .count(),
            ),
            revenue_recovered,
            new_fraud_losses,
            net_benefit: revenue_recovered - new_fraud_losses,
            estimated: true,
        }
    }
}

impl Default for DecisionOptimizer {
    fn default() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::features::FeatureVector;
    use crate::types::transaction::PaymentMethod;

    fn transaction(amount: f64) -> Transaction {
        Transaction::new("tx_1", amount, 1_704_888_000_000, PaymentMethod::CreditCard, "m")
    }

    fn prediction(decision: Decision, p: f64, fdr: f64, confidence: f64) -> ModelPrediction {
        ModelPrediction {
            transaction_id: "tx_1".to_string(),
            fraud_probability: p,
            false_decline_risk: fdr,
            adjusted_score: p,
            risk_score: (p * 100.0).round() as u8,
            decision,
            confidence,
            features: FeatureVector::zeros(),
            explanation: None,
        }
    }

    fn result(original: Decision, optimized: Decision, id: &str, amount: f64) -> OptimizationResult {
        OptimizationResult {
            transaction_id: id.to_string(),
            amount,
            original_decision: original,
            optimized_decision: optimized,
            confidence: 0.8,
            reasoning: Vec::new(),
            expected_value: 0.0,
            potential_revenue: 0.0,
            risk_tolerance: 0.5,
        }
    }

    #[test]
    fn test_expected_value() {
        let ev = DecisionOptimizer::expected_value(100.0, 0.05, 25.0);
        assert!((ev - 88.75).abs() < 1e-9);

        let optimizer = DecisionOptimizer::default();
        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Approve, 0.05, 0.1, 0.9))
            .unwrap();
        assert_eq!(out.potential_revenue, 100.0);
        assert_eq!(out.optimized_decision, Decision::Approve);
        assert!(!out.was_overridden());
    }

    #[test]
    fn test_decline_overridden_to_approve() {
        let optimizer = DecisionOptimizer::default();
        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Decline, 0.2, 0.9, 0.7))
            .unwrap();
        assert_eq!(out.original_decision, Decision::Decline);
        assert_eq!(out.optimized_decision, Decision::Approve);
        assert_eq!(out.confidence, 0.7);
        assert_eq!(out.reasoning[0], "Original decision: DECLINE");
        assert_eq!(out.reasoning[1], "Fraud probability: 20.0%");
        assert_eq!(out.reasoning[2], "False decline risk: 90.0%");
        // Both override rules fire; the approve rule is applied last
        assert!(out.reasoning.iter().any(|r| r.contains("escalating to review")));
        assert!(out.reasoning.iter().any(|r| r.contains("approving to recover revenue")));
    }

    #[test]
    fn test_decline_overridden_to_review() {
        let optimizer = DecisionOptimizer::default();
        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Decline, 0.45, 0.7, 0.7))
            .unwrap();
        // ev = 0.55 * 100 - 0.45 * 125 < 0
        assert_eq!(out.optimized_decision, Decision::Decline);
        assert_eq!(out.potential_revenue, 0.0);

        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Decline, 0.3, 0.7, 0.7))
            .unwrap();
        assert_eq!(out.optimized_decision, Decision::Review);
    }

    #[test]
    fn test_review_overrides() {
        let optimizer = DecisionOptimizer::default();
        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Review, 0.8, 0.2, 0.9))
            .unwrap();
        assert_eq!(out.optimized_decision, Decision::Decline);

        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Review, 0.3, 0.2, 0.85))
            .unwrap();
        assert_eq!(out.optimized_decision, Decision::Approve);

        let out = optimizer
            .optimize(&transaction(100.0), &prediction(Decision::Review, 0.3, 0.2, 0.8))
            .unwrap();
        assert_eq!(out.optimized_decision, Decision::Review);
        assert!(out.reasoning.iter().any(|r| r == "No override applied: REVIEW confirmed"));
    }

    #[test]
    fn test_context_notes() {
        let optimizer = DecisionOptimizer::default();
        let mut pred = prediction(Decision::Approve, 0.05, 0.3, 0.95);
        pred.features = FeatureVector::zeros()
            .with(Feature::AccountAgeDays, 0.9)
            .with(Feature::TxnCount7d, 0.4)
            .with(Feature::IpCountryMatch, 1.0)
            .with(Feature::BillingShippingMatch, 1.0);
        let out = optimizer.optimize(&transaction(40.0), &pred).unwrap();
        let tail: Vec<&str> = out.reasoning.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "Location verified",
                "Active customer with regular transactions",
                "Established customer account"
            ]
        );
    }

    #[test]
    fn test_mismatched_prediction_rejected() {
        let optimizer = DecisionOptimizer::default();
        let mut pred = prediction(Decision::Approve, 0.05, 0.3, 0.95);
        pred.transaction_id = "other".into();
        assert!(matches!(
            optimizer.optimize(&transaction(40.0), &pred),
            Err(PipelineError::Optimization(_))
        ));
    }

    #[test]
    fn test_batch_optimize() {
        let optimizer = DecisionOptimizer::default();
        let txs = vec![transaction(100.0), transaction(100.0)];
        let preds = vec![
            prediction(Decision::Decline, 0.2, 0.9, 0.7),
            prediction(Decision::Review, 0.8, 0.2, 0.9),
        ];
        let out = optimizer.batch_optimize(&txs, &preds).unwrap();
        assert_eq!(out[0].optimized_decision, Decision::Approve);
        assert_eq!(out[1].optimized_decision, Decision::Decline);

        assert!(optimizer.batch_optimize(&txs, &preds[..1]).is_err());
    }

    #[test]
    fn test_optimize_thresholds() {
        let optimizer = DecisionOptimizer::default();
        let history = vec![
            LabeledOutcome { adjusted_score: 0.35, amount: 200.0, is_fraud: false },
            LabeledOutcome { adjusted_score: 0.38, amount: 150.0, is_fraud: false },
            LabeledOutcome { adjusted_score: 0.55, amount: 500.0, is_fraud: true },
            LabeledOutcome { adjusted_score: 0.1, amount: 80.0, is_fraud: false },
        ];
        let best = optimizer.optimize_thresholds(&history, DecisionThresholds::default());
        // Approving the two legitimate 0.3x scores pays; the fraud must be declined
        assert_eq!(best.thresholds.approve, 0.4);
        assert_eq!(best.thresholds.decline, 0.5);
        assert!((best.net_revenue - 430.0).abs() < 1e-9);
        assert_eq!(best.samples, 4);

        let empty = optimizer.optimize_thresholds(&[], DecisionThresholds::default());
        assert_eq!(empty.thresholds, DecisionThresholds::default());
        assert_eq!(empty.samples, 0);
    }

    #[test]
    fn test_metrics_with_ground_truth() {
        let optimizer = DecisionOptimizer::default();
        let results = vec![
            result(Decision::Decline, Decision::Approve, "a", 100.0),
            result(Decision::Decline, Decision::Approve, "b", 50.0),
            result(Decision::Review, Decision::Review, "c", 70.0),
            result(Decision::Approve, Decision::Approve, "d", 30.0),
        ];
        let mut labels = HashMap::new();
        labels.insert("a".to_string(), GroundTruth { is_fraud: false });
        labels.insert("b".to_string(), GroundTruth { is_fraud: true });
        labels.insert("c".to_string(), GroundTruth { is_fraud: false });
        labels.insert("d".to_string(), GroundTruth { is_fraud: false });

        let metrics = optimizer.calculate_optimization_metrics(&results, Some(&labels));
        assert!(!metrics.estimated);
        assert_eq!(metrics.total_transactions, 4);
        assert_eq!(metrics.overrides, 2);
        assert_eq!(metrics.false_decline_rate_before, 0.5);
        assert_eq!(metrics.false_decline_rate_after, 0.25);
        assert_eq!(metrics.revenue_recovered, 100.0);
        assert_eq!(metrics.new_fraud_losses, 75.0);
        assert_eq!(metrics.net_benefit, 25.0);
    }

    #[test]
    fn test_metrics_estimated_without_labels() {
        let optimizer = DecisionOptimizer::default();
        let results = vec![
            result(Decision::Decline, Decision::Approve, "a", 100.0),
            result(Decision::Review, Decision::Approve, "b", 100.0),
            result(Decision::Decline, Decision::Decline, "c", 70.0),
            result(Decision::Approve, Decision::Approve, "d", 30.0),
        ];
        let metrics = optimizer.calculate_optimization_metrics(&results, None);
        assert!(metrics.estimated);
        assert!((metrics.revenue_recovered - 160.0).abs() < 1e-9);
        assert!((metrics.new_fraud_losses - 40.0).abs() < 1e-9);
        assert!((metrics.net_benefit - 120.0).abs() < 1e-9);
        assert_eq!(metrics.false_decline_rate_before, 0.75);
        assert_eq!(metrics.false_decline_rate_after, 0.25);

        let unmatched = HashMap::new();
        assert!(optimizer
            .calculate_optimization_metrics(&results, Some(&unmatched))
            .estimated);
    }
}
