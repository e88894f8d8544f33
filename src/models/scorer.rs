//! Fraud scoring: ensemble probability, rule adjustments, false-decline
//! discounting, thresholds and confidence

use crate::config::ScoringConfig;
use crate::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::feature_store::{map_by_customer, FeatureImportance, FeatureStore};
use crate::models::ensemble::{RiskModel, TreeEnsemble};
use crate::types::features::{Feature, FeatureVector};
use crate::types::optimization::DecisionThresholds;
use crate::types::prediction::{Decision, ModelMetrics, ModelPrediction};
use crate::types::transaction::Transaction;
use std::sync::Arc;
use tracing::debug;

/// Scores feature vectors and turns them into predictions
pub struct Scorer {
    model: Arc<dyn RiskModel>,
    store: Arc<FeatureStore>,
    thresholds: DecisionThresholds,
    false_decline_weight: f64,
    importance: FeatureImportance,
}

impl Scorer {
    /// Create a scorer running the standard tree ensemble
    pub fn new(config: &ScoringConfig, store: Arc<FeatureStore>) -> Result<Self, ConfigurationError> {
        let model = Arc::new(TreeEnsemble::standard(
            config.learning_rate,
            config.base_margin,
        ));
        Self::with_model(config, store, model)
    }

    /// Create a scorer around any risk model
    pub fn with_model(
        config: &ScoringConfig,
        store: Arc<FeatureStore>,
        model: Arc<dyn RiskModel>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let importance = match &config.feature_importance {
            Some(table) => FeatureImportance::from_map(table)?,
            None => FeatureImportance::standard(),
        };
        for feature in model.referenced_features() {
            if !importance.contains(feature) {
                return Err(ConfigurationError::MissingImportance(
                    feature.as_str().to_string(),
                ));
            }
        }

        Ok(Self {
            model,
            store,
            thresholds: config.thresholds(),
            false_decline_weight: config.false_decline_weight,
            importance,
        })
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn thresholds(&self) -> DecisionThresholds {
        self.thresholds
    }

    pub fn importance(&self) -> &FeatureImportance {
        &self.importance
    }

    pub fn feature_store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    /// Ensemble probability followed by the rule adjustments, in fixed order
    pub fn predict_probability(&self, features: &FeatureVector) -> f64 {
        let mut p = self.model.probability(features).clamp(0.0, 1.0);

        if features.flag(Feature::IsCrypto) && features.get(Feature::AmountRatioVsAvg) > 0.8 {
            p = (p * 1.3).min(1.0);
        }
        if features.flag(Feature::IsFirstTransaction) && features.get(Feature::AmountLog) > 0.7 {
            p = (p * 1.2).min(1.0);
        }
        if features.get(Feature::AccountAgeDays) > 0.5 && features.get(Feature::TxnCount7d) > 0.3 {
            p *= 0.8;
        }

        p.clamp(0.0, 1.0)
    }

    /// Likelihood that declining this transaction would turn away a legitimate customer
    pub fn predict_false_decline_risk(&self, features: &FeatureVector, fraud_probability: f64) -> f64 {
        let mut risk = 0.0;

        if features.get(Feature::AccountAgeDays) > 0.4 && features.get(Feature::AmountLog) > 0.6 {
            risk += 0.3;
        }
        let ratio = features.get(Feature::AmountRatioVsAvg);
        if ratio > 0.5 && ratio < 0.9 {
            risk += 0.2;
        }
        if features.flag(Feature::IpCountryMatch) && features.flag(Feature::BillingShippingMatch) {
            risk += 0.3;
        }
        if features.get(Feature::TxnFrequency) > 0.4 {
            risk += 0.2;
        }
        if fraud_probability > 0.3 && fraud_probability < 0.6 {
            risk += 0.3;
        }

        f64::min(risk, 1.0)
    }

    /// Discount the fraud probability by false-decline risk
    pub fn adjust_for_false_decline(fraud_probability: f64, false_decline_risk: f64, weight: f64) -> f64 {
        (fraud_probability * (1.0 - weight * false_decline_risk)).clamp(0.0, 1.0)
    }

    pub fn decide(&self, adjusted_score: f64) -> Decision {
        self.thresholds.decide(adjusted_score)
    }

    pub fn confidence(&self, features: &FeatureVector, score: f64) -> f64 {
        let mut confidence = 0.7;

        if features.get(Feature::AccountAgeDays) > 0.3 && features.get(Feature::TxnCount7d) > 0.2 {
            confidence += 0.15;
        }
        if score < 0.2 || score > 0.7 {
            confidence += 0.1;
        }
        if features.flag(Feature::IpCountryMatch) && features.flag(Feature::BillingShippingMatch) {
            confidence += 0.05;
        }

        f64::min(confidence, 1.0)
    }

    /// Run the scoring chain on already extracted features.
    ///
    /// The returned prediction carries no explanation yet.
    pub fn score_features(
        &self,
        transaction_id: &str,
        features: FeatureVector,
    ) -> PipelineResult<ModelPrediction> {
        features
            .validate()
            .map_err(|e| PipelineError::Scoring(e.to_string()))?;

        let fraud_probability = self.predict_probability(&features);
        if !fraud_probability.is_finite() {
            return Err(PipelineError::Scoring(format!(
                "model {} produced a non-finite probability",
                self.model.name()
            )));
        }

        let false_decline_risk = self.predict_false_decline_risk(&features, fraud_probability);
        let adjusted_score = Self::adjust_for_false_decline(
            fraud_probability,
            false_decline_risk,
            self.false_decline_weight,
        );
        let risk_score = (adjusted_score * 100.0).round() as u8;
        let decision = self.decide(adjusted_score);
        let confidence = self.confidence(&features, adjusted_score);

        debug!(
            transaction_id = %transaction_id,
            fraud_probability,
            false_decline_risk,
            adjusted_score,
            decision = %decision,
            "Scoring complete"
        );

        Ok(ModelPrediction {
            transaction_id: transaction_id.to_string(),
            fraud_probability,
            false_decline_risk,
            adjusted_score,
            risk_score,
            decision,
            confidence,
            features,
            explanation: None,
        })
    }

    /// Extract features for a transaction and score them, without recording it
    pub fn predict(&self, transaction: &Transaction) -> PipelineResult<ModelPrediction> {
        transaction.validate()?;
        let features = self.store.extract(transaction)?;
        self.score_features(&transaction.transaction_id, features)
    }

    /// Predictions aligned to the input order.
    ///
    /// Customers are scored in parallel, each customer's transactions in
    /// timestamp order. Nothing is recorded.
    pub fn batch_predict(&self, transactions: &[Transaction]) -> Vec<PipelineResult<ModelPrediction>> {
        map_by_customer(transactions, |tx| self.predict(tx))
    }

    /// Static model quality report, used until labelled outcomes exist
    pub fn metrics(&self) -> ModelMetrics {
        ModelMetrics::default()
    }
}
