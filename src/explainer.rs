//! Additive feature attribution for fraud predictions.
//!
//! Each feature's contribution is
//! `importance(feature) * (value - normal(feature)) * (probability - base_value)`.
//! This is a Shapley-style decomposition, not an exact Shapley computation:
//! contributions are deterministic for a given feature vector and probability,
//! but their sum only loosely tracks `probability - base_value`.

use crate::error::{PipelineError, PipelineResult};
use crate::feature_store::FeatureImportance;
use crate::types::features::{Feature, FeatureVector};
use crate::types::prediction::{FeatureContribution, ImpactDirection, RiskExplanation};
use std::collections::BTreeMap;

/// Baseline fraud risk that contributions are measured against
pub const BASE_VALUE: f64 = 0.15;
/// Number of contributions kept as top features
pub const TOP_K: usize = 5;

/// Normal value for features without an entry in the table
const DEFAULT_NORMAL: f64 = 0.5;

/// Builds risk explanations from feature contributions
#[derive(Debug, Clone)]
pub struct Explainer {
    importance: FeatureImportance,
    base_value: f64,
    top_k: usize,
}

impl Explainer {
    pub fn new(importance: FeatureImportance) -> Self {
        Self {
            importance,
            base_value: BASE_VALUE,
            top_k: TOP_K,
        }
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    /// Value of a feature for a typical legitimate transaction
    pub fn normal_value(feature: Feature) -> f64 {
        match feature {
            Feature::Amount => 0.01,
            Feature::AmountLog => 0.45,
            Feature::IsWeekend => 0.0,
            Feature::TxnCount24h => 0.1,
            Feature::TxnCount7d => 0.2,
            Feature::AvgAmount30d => 0.1,
            Feature::TxnFrequency => 0.2,
            Feature::IsFirstTransaction => 0.0,
            Feature::AmountRatioVsAvg => 0.2,
            Feature::DeviceAgeDays => 0.3,
            Feature::IpCountryMatch => 1.0,
            Feature::BillingShippingMatch => 1.0,
            Feature::MerchantFraudRate30d => 0.05,
            Feature::MerchantAvgAmount => 0.1,
            Feature::PaymentMethodRiskScore => 0.3,
            Feature::IsCrypto => 0.0,
            _ => DEFAULT_NORMAL,
        }
    }

    /// Sentence pair (risk wording, protective wording) for a feature
    fn wording(feature: Feature) -> Option<(&'static str, &'static str)> {
        let pair = match feature {
            Feature::Amount => (
                "Transaction amount is unusually large",
                "Transaction amount is in a typical range",
            ),
            Feature::AmountLog => (
                "High transaction value",
                "Modest transaction value",
            ),
            Feature::IsWeekend => (
                "Weekend activity pattern",
                "Weekday activity pattern",
            ),
            Feature::AccountAgeDays => (
                "Account age profile adds risk",
                "Account age supports legitimacy",
            ),
            Feature::TxnCount24h => (
                "Burst of transactions in the last 24 hours",
                "Normal transaction count in the last 24 hours",
            ),
            Feature::TxnCount7d => (
                "Unusual weekly transaction volume",
                "Regular weekly transaction volume",
            ),
            Feature::TxnFrequency => (
                "Irregular transaction frequency",
                "Consistent transaction frequency",
            ),
            Feature::IsFirstTransaction => (
                "First transaction from this customer",
                "Returning customer with transaction history",
            ),
            Feature::AmountRatioVsAvg => (
                "Amount far above the customer's average",
                "Amount in line with the customer's average",
            ),
            Feature::TimeSinceLastTxnMinutes => (
                "Unusual time since the previous transaction",
                "Normal spacing between transactions",
            ),
            Feature::DeviceAgeDays => (
                "Device age is atypical for this customer",
                "Device has an established history",
            ),
            Feature::IpCountryMatch => (
                "IP country does not match the account country",
                "IP country matches the account country",
            ),
            Feature::BillingShippingMatch => (
                "Billing and shipping addresses differ",
                "Billing and shipping addresses match",
            ),
            Feature::MerchantFraudRate30d => (
                "Merchant has an elevated fraud rate",
                "Merchant has a low fraud rate",
            ),
            Feature::PaymentMethodRiskScore => (
                "Higher-risk payment method",
                "Lower-risk payment method",
            ),
            Feature::IsCrypto => (
                "Cryptocurrency payment",
                "Non-cryptocurrency payment",
            ),
            _ => return None,
        };
        Some(pair)
    }

    /// Attribute the probability to individual features
    pub fn explain(
        &self,
        features: &FeatureVector,
        fraud_probability: f64,
    ) -> PipelineResult<RiskExplanation> {
        if !fraud_probability.is_finite() {
            return Err(PipelineError::Explanation(format!(
                "fraud probability {} is not finite",
                fraud_probability
            )));
        }
        let delta = fraud_probability - self.base_value;

        let mut contributions = Vec::with_capacity(Feature::COUNT);
        for (feature, value) in features.iter() {
            let deviation = value - Self::normal_value(feature);
            let contribution = self.importance.weight(feature) * deviation * delta;
            if !contribution.is_finite() {
                return Err(PipelineError::Explanation(format!(
                    "contribution of {} is not finite",
                    feature
                )));
            }
            contributions.push((feature, contribution));
        }

        let shap_values: BTreeMap<String, f64> = contributions
            .iter()
            .map(|(f, c)| (f.as_str().to_string(), *c))
            .collect();

        // Stable sort keeps schema order among equal magnitudes
        contributions.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        contributions.truncate(self.top_k);

        let mut risk_factors = Vec::new();
        let mut protective_factors = Vec::new();
        let top_features = contributions
            .into_iter()
            .map(|(feature, contribution)| {
                let impact = ImpactDirection::from_contribution(contribution);
                if let Some((risk, protective)) = Self::wording(feature) {
                    match impact {
                        ImpactDirection::IncreasesRisk => risk_factors.push(risk.to_string()),
                        ImpactDirection::DecreasesRisk => {
                            protective_factors.push(protective.to_string())
                        }
                        ImpactDirection::Neutral => {}
                    }
                }
                FeatureContribution {
                    feature: feature.as_str().to_string(),
                    contribution,
                    impact,
                    importance: contribution.abs(),
                }
            })
            .collect();

        Ok(RiskExplanation {
            top_features,
            risk_factors,
            protective_factors,
            shap_values,
        })
    }

    /// Rule-ordered narrative of the checks behind a score; descriptive only
    pub fn decision_path(&self, features: &FeatureVector, fraud_probability: f64) -> Vec<String> {
        let mut path = Vec::with_capacity(6);

        let merchant_rate = features.get(Feature::MerchantFraudRate30d);
        if merchant_rate > 0.1 {
            path.push(format!(
                "Merchant fraud rate {:.1}% is elevated",
                merchant_rate * 100.0
            ));
        } else {
            path.push(format!(
                "Merchant fraud rate {:.1}% is within normal range",
                merchant_rate * 100.0
            ));
        }

        if features.get(Feature::AmountRatioVsAvg) > 0.6 {
            path.push("Amount is significantly above the customer's average".to_string());
        } else {
            path.push("Amount is consistent with the customer's history".to_string());
        }

        if features.get(Feature::AccountAgeDays) < 0.1 {
            path.push("Account is new".to_string());
        } else {
            path.push("Account is established".to_string());
        }

        if features.flag(Feature::IpCountryMatch) && features.flag(Feature::BillingShippingMatch) {
            path.push("Location signals verified".to_string());
        } else {
            path.push("Location mismatch detected".to_string());
        }

        if features.get(Feature::DeviceAgeDays) < 0.05 {
            path.push("Device is new".to_string());
        } else {
            path.push("Device is recognized".to_string());
        }

        let verdict = if fraud_probability > 0.7 {
            "High risk: decline recommended"
        } else if fraud_probability > 0.4 {
            "Medium risk: manual review recommended"
        } else {
            "Low risk: approval recommended"
        };
        path.push(verdict.to_string());

        path
    }
}

impl Default for Explainer {
    fn default() -> Self {
        Self::new(FeatureImportance::standard())
    }
}
