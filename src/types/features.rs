//! Fixed feature schema and feature vectors

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named model input. The schema is fixed: every vector carries every feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    // Basic
    Amount,
    AmountLog,
    TimeOfDay,
    DayOfWeek,
    IsWeekend,
    // User behavior
    AccountAgeDays,
    TxnCount24h,
    TxnCount7d,
    AvgAmount30d,
    TxnFrequency,
    IsFirstTransaction,
    // Velocity
    AmountRatioVsAvg,
    TimeSinceLastTxnMinutes,
    // Device / location
    DeviceAgeDays,
    IpCountryMatch,
    BillingShippingMatch,
    // Merchant
    MerchantFraudRate30d,
    MerchantAvgAmount,
    // Payment method
    PaymentMethodRiskScore,
    IsCrypto,
}

impl Feature {
    pub const COUNT: usize = 20;

    /// All features in schema order
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Amount,
        Feature::AmountLog,
        Feature::TimeOfDay,
        Feature::DayOfWeek,
        Feature::IsWeekend,
        Feature::AccountAgeDays,
        Feature::TxnCount24h,
        Feature::TxnCount7d,
        Feature::AvgAmount30d,
        Feature::TxnFrequency,
        Feature::IsFirstTransaction,
        Feature::AmountRatioVsAvg,
        Feature::TimeSinceLastTxnMinutes,
        Feature::DeviceAgeDays,
        Feature::IpCountryMatch,
        Feature::BillingShippingMatch,
        Feature::MerchantFraudRate30d,
        Feature::MerchantAvgAmount,
        Feature::PaymentMethodRiskScore,
        Feature::IsCrypto,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Amount => "amount",
            Feature::AmountLog => "amount_log",
            Feature::TimeOfDay => "time_of_day",
            Feature::DayOfWeek => "day_of_week",
            Feature::IsWeekend => "is_weekend",
            Feature::AccountAgeDays => "account_age_days",
            Feature::TxnCount24h => "txn_count_24h",
            Feature::TxnCount7d => "txn_count_7d",
            Feature::AvgAmount30d => "avg_amount_30d",
            Feature::TxnFrequency => "txn_frequency",
            Feature::IsFirstTransaction => "is_first_transaction",
            Feature::AmountRatioVsAvg => "amount_ratio_vs_avg",
            Feature::TimeSinceLastTxnMinutes => "time_since_last_txn_minutes",
            Feature::DeviceAgeDays => "device_age_days",
            Feature::IpCountryMatch => "ip_country_match",
            Feature::BillingShippingMatch => "billing_shipping_match",
            Feature::MerchantFraudRate30d => "merchant_fraud_rate_30d",
            Feature::MerchantAvgAmount => "merchant_avg_amount",
            Feature::PaymentMethodRiskScore => "payment_method_risk_score",
            Feature::IsCrypto => "is_crypto",
        }
    }

    /// Scaled (not capped) features may exceed 1.0
    pub fn is_bounded(&self) -> bool {
        !matches!(
            self,
            Feature::AmountLog | Feature::AvgAmount30d | Feature::MerchantAvgAmount
        )
    }

    /// Features derived from device/geo signals rather than history
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            Feature::DeviceAgeDays | Feature::IpCountryMatch | Feature::BillingShippingMatch
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownFeature(s.to_string()))
    }
}

/// Feature value outside its documented range
#[derive(Debug, Clone, PartialEq, Error)]
#[error("feature `{feature}` has invalid value {value}")]
pub struct InvalidFeatureValue {
    pub feature: Feature,
    pub value: f64,
}

/// Fixed-shape vector of normalized feature values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, f64>",
    try_from = "BTreeMap<String, f64>"
)]
pub struct FeatureVector {
    values: [f64; Feature::COUNT],
}

impl FeatureVector {
    /// All-zero vector
    pub fn zeros() -> Self {
        Self {
            values: [0.0; Feature::COUNT],
        }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        self.values[feature.index()] = value;
    }

    pub fn with(mut self, feature: Feature, value: f64) -> Self {
        self.set(feature, value);
        self
    }

    /// Binary features are stored as 0.0/1.0
    pub fn flag(&self, feature: Feature) -> bool {
        self.get(feature) > 0.5
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().map(move |&f| (f, self.values[f.index()]))
    }

    /// Check every value is finite, non-negative and within bounds where bounded
    pub fn validate(&self) -> Result<(), InvalidFeatureValue> {
        for (feature, value) in self.iter() {
            let in_range = value.is_finite()
                && value >= 0.0
                && (!feature.is_bounded() || value <= 1.0);
            if !in_range {
                return Err(InvalidFeatureValue { feature, value });
            }
        }
        Ok(())
    }

    /// Build from a named map; every schema feature must be present
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self, ConfigurationError> {
        for name in map.keys() {
            name.parse::<Feature>()?;
        }
        let mut vector = Self::zeros();
        for feature in Feature::ALL {
            let value = map
                .get(feature.as_str())
                .copied()
                .ok_or_else(|| ConfigurationError::MissingFeature(feature.as_str().to_string()))?;
            vector.set(feature, value);
        }
        Ok(vector)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter()
            .map(|(f, v)| (f.as_str().to_string(), v))
            .collect()
    }
}

impl From<FeatureVector> for BTreeMap<String, f64> {
    fn from(vector: FeatureVector) -> Self {
        vector.to_map()
    }
}

impl TryFrom<BTreeMap<String, f64>> for FeatureVector {
    type Error = ConfigurationError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        FeatureVector::from_map(&map)
    }
}
