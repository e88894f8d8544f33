//! External signal sources consumed by feature extraction
//!
//! Account age, device/location checks and merchant risk come from
//! collaborators outside the scoring core. The implementations here are
//! static tables suitable for a single process; swap them for service
//! clients behind the same traits.

use crate::types::transaction::{DeviceSignals, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fraud rate assumed for merchants missing from the lookup
pub const DEFAULT_MERCHANT_FRAUD_RATE: f64 = 0.08;
/// Average amount assumed for merchants missing from the lookup
pub const DEFAULT_MERCHANT_AVG_AMOUNT: f64 = 100.0;

/// Source of customer account ages
pub trait AccountAgeProvider: Send + Sync {
    /// Age of the customer's account in days, `None` if unknown
    fn account_age_days(&self, customer_id: &str) -> Option<f64>;
}

/// Source of device and location signals for a transaction
pub trait DeviceSignalProvider: Send + Sync {
    fn signals(&self, transaction: &Transaction) -> DeviceSignals;
}

/// Source of merchant risk statistics
pub trait MerchantRiskLookup: Send + Sync {
    fn profile(&self, merchant_id: &str) -> MerchantProfile;
}

/// Risk statistics for one merchant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantProfile {
    pub merchant_id: String,
    /// Share of the merchant's transactions confirmed fraudulent over 30 days
    pub fraud_rate: f64,
    pub avg_amount: f64,
}

impl MerchantProfile {
    pub fn new(merchant_id: impl Into<String>, fraud_rate: f64, avg_amount: f64) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            fraud_rate,
            avg_amount,
        }
    }

    fn unknown(merchant_id: &str) -> Self {
        Self::new(
            merchant_id,
            DEFAULT_MERCHANT_FRAUD_RATE,
            DEFAULT_MERCHANT_AVG_AMOUNT,
        )
    }
}

/// In-memory merchant table
#[derive(Debug, Clone, Default)]
pub struct StaticMerchantTable {
    merchants: HashMap<String, MerchantProfile>,
}

impl StaticMerchantTable {
    pub fn new(profiles: impl IntoIterator<Item = MerchantProfile>) -> Self {
        Self {
            merchants: profiles
                .into_iter()
                .map(|p| (p.merchant_id.clone(), p))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.merchants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merchants.is_empty()
    }
}

impl MerchantRiskLookup for StaticMerchantTable {
    fn profile(&self, merchant_id: &str) -> MerchantProfile {
        self.merchants
            .get(merchant_id)
            .cloned()
            .unwrap_or_else(|| MerchantProfile::unknown(merchant_id))
    }
}

/// In-memory account age directory
#[derive(Debug, Clone, Default)]
pub struct StaticAccountDirectory {
    ages: HashMap<String, f64>,
}

impl StaticAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, customer_id: impl Into<String>, age_days: f64) -> Self {
        self.ages.insert(customer_id.into(), age_days);
        self
    }
}

impl AccountAgeProvider for StaticAccountDirectory {
    fn account_age_days(&self, customer_id: &str) -> Option<f64> {
        self.ages.get(customer_id).copied()
    }
}

/// Uses the signals attached to the transaction, or a fixed fallback
#[derive(Debug, Clone, Default)]
pub struct PassThroughSignals {
    fallback: DeviceSignals,
}

impl PassThroughSignals {
    pub fn with_fallback(fallback: DeviceSignals) -> Self {
        Self { fallback }
    }
}

impl DeviceSignalProvider for PassThroughSignals {
    fn signals(&self, transaction: &Transaction) -> DeviceSignals {
        transaction.device.unwrap_or(self.fallback)
    }
}
