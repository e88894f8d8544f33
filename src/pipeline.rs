//! Risk assessment pipeline: feature extraction, scoring, explanation and
//! decision optimization for one transaction, plus aggregate statistics.

use crate::config::{AppConfig, ScoringConfig};
use crate::error::{ConfigurationError, PipelineResult};
use crate::explainer::Explainer;
use crate::feature_store::{map_by_customer, FeatureStore};
use crate::metrics::PipelineMetrics;
use crate::models::Scorer;
use crate::optimizer::DecisionOptimizer;
use crate::prediction_log::{PredictionLog, RealTimeStats};
use crate::types::optimization::{OptimizationMetrics, OptimizationResult, ThresholdRecommendation};
use crate::types::prediction::{Decision, GroundTruth, ModelMetrics, ModelPrediction};
use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of assessing one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: Uuid,
    pub assessed_at: DateTime<Utc>,
    pub processing_time_us: u64,
    pub prediction: ModelPrediction,
    pub optimization: OptimizationResult,
    /// Rule-ordered narrative of the checks behind the score
    #[serde(default)]
    pub decision_path: Vec<String>,
}

impl RiskAssessment {
    pub fn transaction_id(&self) -> &str {
        &self.prediction.transaction_id
    }

    pub fn final_decision(&self) -> Decision {
        self.optimization.optimized_decision
    }
}

/// Side-by-side predictions from two scorer variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestResult {
    pub prediction_a: ModelPrediction,
    pub prediction_b: ModelPrediction,
    pub recommendation: String,
}

/// Runs the assessment chain and keeps the rolling prediction log
pub struct RiskPipeline {
    store: Arc<FeatureStore>,
    scorer: Scorer,
    explainer: Explainer,
    optimizer: DecisionOptimizer,
    log: PredictionLog,
    metrics: Arc<PipelineMetrics>,
}

impl RiskPipeline {
    /// Create a pipeline with a feature store built from the configuration
    pub fn new(config: &AppConfig) -> Result<Self, ConfigurationError> {
        Self::with_store(config, Arc::new(FeatureStore::from_config(config)))
    }

    /// Create a pipeline around an existing feature store
    pub fn with_store(config: &AppConfig, store: Arc<FeatureStore>) -> Result<Self, ConfigurationError> {
        let scorer = Scorer::new(&config.scoring, store.clone())?;
        let explainer = Explainer::new(scorer.importance().clone());
        let optimizer = DecisionOptimizer::new(config.optimizer.clone())?;

        info!(
            model = scorer.model_name(),
            features = store.feature_count(),
            approve_threshold = scorer.thresholds().approve,
            decline_threshold = scorer.thresholds().decline,
            "Risk pipeline initialized"
        );

        Ok(Self {
            store,
            scorer,
            explainer,
            optimizer,
            log: PredictionLog::new(config.pipeline.prediction_log_capacity),
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Share a metrics collector with the caller
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn feature_store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn optimizer(&self) -> &DecisionOptimizer {
        &self.optimizer
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn prediction_log(&self) -> &PredictionLog {
        &self.log
    }

    /// Assess one transaction and record it in its customer's history.
    ///
    /// The customer's history stays locked from extraction until the
    /// transaction is recorded. A failure at any stage leaves the history
    /// and the prediction log untouched.
    pub fn assess_risk(&self, transaction: &Transaction) -> PipelineResult<RiskAssessment> {
        let start = Instant::now();

        match self.run(transaction) {
            Ok((prediction, optimization)) => {
                let elapsed = start.elapsed();
                self.metrics.record_assessment(
                    elapsed,
                    prediction.risk_score,
                    optimization.optimized_decision,
                    optimization.was_overridden(),
                );

                if optimization.optimized_decision == Decision::Approve && !optimization.was_overridden() {
                    debug!(
                        transaction_id = %transaction.transaction_id,
                        risk_score = prediction.risk_score,
                        processing_time_us = elapsed.as_micros(),
                        "Transaction approved"
                    );
                } else {
                    info!(
                        transaction_id = %transaction.transaction_id,
                        risk_score = prediction.risk_score,
                        fraud_probability = prediction.fraud_probability,
                        original = %optimization.original_decision,
                        decision = %optimization.optimized_decision,
                        processing_time_us = elapsed.as_micros(),
                        "Transaction assessed"
                    );
                }

                let decision_path = self
                    .explainer
                    .decision_path(&prediction.features, prediction.fraud_probability);
                Ok(RiskAssessment {
                    assessment_id: Uuid::new_v4(),
                    assessed_at: Utc::now(),
                    processing_time_us: elapsed.as_micros() as u64,
                    prediction,
                    optimization,
                    decision_path,
                })
            }
            Err(e) => {
                self.metrics.record_failure(e.stage());
                warn!(
                    transaction_id = %transaction.transaction_id,
                    stage = e.stage().as_str(),
                    error = %e,
                    "Assessment failed"
                );
                Err(e)
            }
        }
    }

    fn run(&self, transaction: &Transaction) -> PipelineResult<(ModelPrediction, OptimizationResult)> {
        transaction.validate()?;

        self.store
            .with_customer(transaction.customer_key(), |session| {
                let features = session.extract(transaction)?;
                let prediction = self
                    .scorer
                    .score_features(&transaction.transaction_id, features)?;
                let explanation = self
                    .explainer
                    .explain(&prediction.features, prediction.fraud_probability)?;
                let prediction = prediction.with_explanation(explanation);
                let optimization = self.optimizer.optimize(transaction, &prediction)?;
                session.ensure_recordable(transaction)?;
                self.log.push(prediction.clone(), optimization.clone())?;
                session.record(transaction)?;
                Ok((prediction, optimization))
            })
    }

    /// Assess many transactions, results aligned to the input order.
    ///
    /// Customers are processed in parallel; one customer's transactions are
    /// assessed sequentially in timestamp order.
    pub fn batch_assess_risk(&self, transactions: &[Transaction]) -> Vec<PipelineResult<RiskAssessment>> {
        let results = map_by_customer(transactions, |tx| self.assess_risk(tx));
        debug!(batch_size = transactions.len(), "Batch assessed");
        results
    }

    /// Optimize predictions produced elsewhere, aligned to the transactions
    pub fn batch_optimize(
        &self,
        transactions: &[Transaction],
        predictions: &[ModelPrediction],
    ) -> PipelineResult<Vec<OptimizationResult>> {
        self.optimizer.batch_optimize(transactions, predictions)
    }

    /// Measured metrics once outcomes are labelled, the static report before that
    pub fn get_model_metrics(&self) -> PipelineResult<ModelMetrics> {
        Ok(self
            .log
            .model_metrics()?
            .unwrap_or_else(|| self.scorer.metrics()))
    }

    pub fn get_feature_importance(&self) -> BTreeMap<String, f64> {
        self.scorer.importance().to_map()
    }

    pub fn get_real_time_stats(&self) -> PipelineResult<RealTimeStats> {
        self.log.real_time_stats()
    }

    /// Build a scorer variant that shares this pipeline's feature store
    pub fn variant(&self, config: &ScoringConfig) -> Result<Scorer, ConfigurationError> {
        Scorer::new(config, self.store.clone())
    }

    /// Score a transaction with two variants without recording it
    pub fn ab_test(
        &self,
        transaction: &Transaction,
        variant_a: &Scorer,
        variant_b: &Scorer,
    ) -> PipelineResult<AbTestResult> {
        let prediction_a = variant_a.predict(transaction)?;
        let prediction_b = variant_b.predict(transaction)?;

        let (a, b) = (prediction_a.risk_score, prediction_b.risk_score);
        let recommendation = if a.abs_diff(b) < 5 {
            format!("Variants agree (risk scores {} and {})", a, b)
        } else if prediction_a.confidence >= prediction_b.confidence {
            format!(
                "Variant A is more confident ({:.0}% vs {:.0}%)",
                prediction_a.confidence * 100.0,
                prediction_b.confidence * 100.0
            )
        } else {
            format!(
                "Variant B is more confident ({:.0}% vs {:.0}%)",
                prediction_b.confidence * 100.0,
                prediction_a.confidence * 100.0
            )
        };

        debug!(
            transaction_id = %transaction.transaction_id,
            score_a = a,
            score_b = b,
            recommendation = %recommendation,
            "A/B comparison"
        );

        Ok(AbTestResult {
            prediction_a,
            prediction_b,
            recommendation,
        })
    }

    /// Label a logged transaction. Returns false when it is no longer in the log.
    pub fn record_outcome(&self, transaction_id: &str, truth: GroundTruth) -> PipelineResult<bool> {
        self.log.record_outcome(transaction_id, truth)
    }

    /// Threshold search over the labelled log entries
    pub fn optimize_thresholds(&self) -> PipelineResult<ThresholdRecommendation> {
        let outcomes = self.log.labeled_outcomes()?;
        Ok(self
            .optimizer
            .optimize_thresholds(&outcomes, self.scorer.thresholds()))
    }

    /// Business impact of overrides across the log
    pub fn optimization_metrics(&self) -> PipelineResult<OptimizationMetrics> {
        let (results, labels) = self.log.optimization_snapshot()?;
        let labels = if labels.is_empty() { None } else { Some(&labels) };
        Ok(self.optimizer.calculate_optimization_metrics(&results, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, ValidationError};
    use crate::signals::{PassThroughSignals, StaticAccountDirectory, StaticMerchantTable};
    use crate::types::prediction::MetricsSource;
    use crate::types::transaction::PaymentMethod;

    /// Wed 2024-01-10 12:00 UTC
    const NOON: i64 = 1_704_888_000_000;
    const DAY: i64 = 86_400_000;

    fn pipeline() -> RiskPipeline {
        let config = AppConfig::default();
        let store = Arc::new(FeatureStore::new(
            config.feature_store.clone(),
            Arc::new(StaticAccountDirectory::new().with_account("regular", 400.0)),
            Arc::new(PassThroughSignals::default()),
            Arc::new(StaticMerchantTable::new(config.merchants.iter().cloned())),
        ));
        RiskPipeline::with_store(&config, store).unwrap()
    }

    fn payment(id: &str, customer: &str, amount: f64, timestamp: i64) -> Transaction {
        Transaction::new(id, amount, timestamp, PaymentMethod::Crypto, "crypto_exchange")
            .with_customer(customer)
    }

    #[test]
    fn test_first_time_customer_scores_above_established() {
        let pipeline = pipeline();
        for day in (1..=90).rev() {
            let tx = payment(&format!("hist_{}", day), "regular", 50.0, NOON - day * DAY);
            pipeline.feature_store().record(&tx).unwrap();
        }

        let newcomer = pipeline
            .assess_risk(&payment("tx_new", "newcomer", 5000.0, NOON))
            .unwrap();
        let regular = pipeline
            .assess_risk(&payment("tx_regular", "regular", 5000.0, NOON))
            .unwrap();

        let p_new = newcomer.prediction.fraud_probability;
        let p_regular = regular.prediction.fraud_probability;
        assert!((p_new - 0.4445).abs() < 1e-3);
        assert!((p_regular - 0.2257).abs() < 1e-3);
        assert!(p_new > p_regular + 0.1);

        assert_eq!(newcomer.prediction.decision, Decision::Review);
        assert_eq!(newcomer.final_decision(), Decision::Review);
        assert_eq!(regular.prediction.decision, Decision::Approve);
        assert!(newcomer.prediction.explanation.is_some());
        assert!(newcomer.optimization.expected_value > 0.0);
        assert_eq!(newcomer.decision_path.len(), 6);
        assert!(newcomer.decision_path.contains(&"Account is new".to_string()));
        assert_eq!(
            newcomer.decision_path.last().map(String::as_str),
            Some("Medium risk: manual review recommended")
        );
        assert_eq!(
            regular.decision_path.last().map(String::as_str),
            Some("Low risk: approval recommended")
        );

        assert_eq!(pipeline.feature_store().history_len("newcomer"), 1);
        assert_eq!(pipeline.feature_store().history_len("regular"), 91);
    }

    #[test]
    fn test_prediction_ranges() {
        let pipeline = pipeline();
        for (i, amount) in [0.01, 12.5, 480.0, 9_999.0, 250_000.0].iter().enumerate() {
            let tx = payment(&format!("tx_{}", i), "range", *amount, NOON + i as i64 * 60_000);
            let prediction = pipeline.assess_risk(&tx).unwrap().prediction;
            for value in [
                prediction.fraud_probability,
                prediction.false_decline_risk,
                prediction.adjusted_score,
                prediction.confidence,
            ] {
                assert!((0.0..=1.0).contains(&value));
            }
            assert!(prediction.risk_score <= 100);
        }
    }

    #[test]
    fn test_invalid_transaction_leaves_no_state() {
        let pipeline = pipeline();
        let tx = payment("tx_bad", "mallory", -5.0, NOON);
        let err = pipeline.assess_risk(&tx).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::InvalidAmount(_))
        ));
        assert_eq!(pipeline.feature_store().history_len("mallory"), 0);
        assert!(pipeline.prediction_log().is_empty());
        assert_eq!(pipeline.metrics().get_failures_by_stage().len(), 1);
    }

    #[test]
    fn test_duplicate_transaction_is_state_inconsistency() {
        let pipeline = pipeline();
        let tx = payment("tx_dup", "dave", 20.0, NOON);
        pipeline.assess_risk(&tx).unwrap();
        let err = pipeline.assess_risk(&tx).unwrap_err();
        assert!(matches!(err, PipelineError::StateInconsistency(_)));
        assert_eq!(pipeline.feature_store().history_len("dave"), 1);
        assert_eq!(pipeline.prediction_log().len(), 1);
    }

    #[test]
    fn test_log_failure_leaves_history_untouched() {
        let pipeline = pipeline();
        pipeline.prediction_log().poison();

        let err = pipeline
            .assess_risk(&payment("tx_lost", "olga", 20.0, NOON))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StateInconsistency(_)));
        assert_eq!(pipeline.feature_store().history_len("olga"), 0);
    }

    #[test]
    fn test_concurrent_assessments_for_one_customer() {
        let pipeline = Arc::new(pipeline());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let tx = payment(
                            &format!("tx_{}_{}", t, i),
                            "shared",
                            30.0,
                            NOON + (t * 25 + i) * 1_000,
                        );
                        pipeline.assess_risk(&tx).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pipeline.feature_store().history_len("shared"), 200);
        let mut ids = pipeline.feature_store().history_ids("shared");
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(pipeline.get_real_time_stats().unwrap().total_predictions, 200);
    }

    #[test]
    fn test_batch_preserves_order_and_sequences_customers() {
        let pipeline = pipeline();
        let batch = vec![
            payment("late", "erin", 40.0, NOON + DAY),
            payment("other", "frank", 40.0, NOON),
            payment("early", "erin", 40.0, NOON),
            payment("bad", "gina", f64::NAN, NOON),
        ];
        let results = pipeline.batch_assess_risk(&batch);
        assert_eq!(results.len(), 4);

        let ids: Vec<&str> = results
            .iter()
            .take(3)
            .map(|r| r.as_ref().unwrap().transaction_id())
            .collect();
        assert_eq!(ids, vec!["late", "other", "early"]);
        assert!(results[3].is_err());

        let flag = |i: usize| {
            results[i]
                .as_ref()
                .unwrap()
                .prediction
                .features
                .flag(crate::types::features::Feature::IsFirstTransaction)
        };
        // the earlier erin transaction is assessed first
        assert!(flag(2));
        assert!(!flag(0));
        assert_eq!(
            pipeline.feature_store().history_ids("erin"),
            vec!["early".to_string(), "late".to_string()]
        );
    }

    #[test]
    fn test_real_time_stats_and_metrics() {
        let pipeline = pipeline();
        assert_eq!(pipeline.get_model_metrics().unwrap().source, MetricsSource::Static);

        let first = pipeline.assess_risk(&payment("a", "hank", 5000.0, NOON)).unwrap();
        let second = pipeline.assess_risk(&payment("b", "ivy", 20.0, NOON)).unwrap();

        let stats = pipeline.get_real_time_stats().unwrap();
        assert_eq!(stats.total_predictions, 2);
        let expected_avg =
            (first.prediction.risk_score as f64 + second.prediction.risk_score as f64) / 2.0;
        assert_eq!(stats.avg_risk_score, expected_avg);

        assert!(pipeline.record_outcome("a", GroundTruth { is_fraud: true }).unwrap());
        assert!(pipeline.record_outcome("b", GroundTruth { is_fraud: false }).unwrap());
        assert!(!pipeline.record_outcome("zzz", GroundTruth { is_fraud: false }).unwrap());

        let metrics = pipeline.get_model_metrics().unwrap();
        assert_eq!(metrics.source, MetricsSource::Measured);
        assert_eq!(metrics.labeled_samples, 2);

        let recommendation = pipeline.optimize_thresholds().unwrap();
        assert_eq!(recommendation.samples, 2);

        let impact = pipeline.optimization_metrics().unwrap();
        assert!(!impact.estimated);
        assert_eq!(impact.total_transactions, 2);
    }

    #[test]
    fn test_feature_importance_exposed() {
        let pipeline = pipeline();
        let importance = pipeline.get_feature_importance();
        assert_eq!(importance.len(), 20);
        assert_eq!(importance.get("amount_ratio_vs_avg"), Some(&0.10));
    }

    #[test]
    fn test_ab_test() {
        let pipeline = pipeline();
        let tx = payment("ab", "jack", 5000.0, NOON);

        let a = pipeline.variant(&ScoringConfig::default()).unwrap();
        let b = pipeline.variant(&ScoringConfig::default()).unwrap();
        let same = pipeline.ab_test(&tx, &a, &b).unwrap();
        assert!(same.recommendation.starts_with("Variants agree"));

        let aggressive = ScoringConfig {
            base_margin: -1.0,
            ..ScoringConfig::default()
        };
        let b = pipeline.variant(&aggressive).unwrap();
        let result = pipeline.ab_test(&tx, &a, &b).unwrap();
        assert!(result.prediction_b.risk_score > result.prediction_a.risk_score + 5);
        assert!(result.recommendation.contains("more confident"));

        // A/B comparisons do not touch history
        assert_eq!(pipeline.feature_store().history_len("jack"), 0);
    }

    #[test]
    fn test_inconsistent_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.scoring.approve_threshold = 0.7;
        config.scoring.decline_threshold = 0.6;
        assert!(matches!(
            RiskPipeline::new(&config),
            Err(ConfigurationError::ThresholdOrdering { .. })
        ));
    }
}
