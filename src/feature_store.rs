//! Per-customer transaction history and feature extraction.
//!
//! Features are derived from a transaction plus the customer's history as it
//! stood *before* the transaction. History is append-only and bounded; the
//! oldest entry is evicted first once the capacity is exceeded.

use crate::config::{AppConfig, FeatureStoreConfig};
use crate::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::signals::{
    AccountAgeProvider, DeviceSignalProvider, MerchantRiskLookup, PassThroughSignals,
    StaticAccountDirectory, StaticMerchantTable,
};
use crate::types::features::{Feature, FeatureVector};
use crate::types::transaction::Transaction;
use chrono::{Datelike, Timelike};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

const MINUTE_MS: i64 = 60_000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// Amount at which the linear and log amount features reach 1.0
const AMOUNT_SCALE: f64 = 10_000.0;
/// Divisor for average-amount features
const AVG_AMOUNT_SCALE: f64 = 1_000.0;
const TXN_24H_CAP: f64 = 10.0;
const TXN_7D_CAP: f64 = 50.0;
const FREQUENCY_CAP: f64 = 5.0;
const AMOUNT_RATIO_CAP: f64 = 5.0;
const MINUTES_SINCE_LAST_CAP: f64 = 1_440.0;
const AGE_DAYS_CAP: f64 = 365.0;

/// One remembered transaction
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub transaction_id: String,
    pub amount: f64,
    pub timestamp: i64,
}

/// Bounded FIFO of a customer's past transactions
#[derive(Debug)]
pub struct UserHistory {
    entries: VecDeque<HistoryEntry>,
    ids: HashSet<String>,
    capacity: usize,
}

impl UserHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            ids: HashSet::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.ids.contains(transaction_id)
    }

    fn ensure_unrecorded(&self, transaction_id: &str) -> PipelineResult<()> {
        if self.contains(transaction_id) {
            return Err(PipelineError::StateInconsistency(format!(
                "transaction {} already recorded",
                transaction_id
            )));
        }
        Ok(())
    }

    /// Append a transaction, evicting the oldest entry past capacity
    fn push(&mut self, transaction: &Transaction) -> PipelineResult<()> {
        self.ensure_unrecorded(&transaction.transaction_id)?;

        self.entries.push_back(HistoryEntry {
            transaction_id: transaction.transaction_id.clone(),
            amount: transaction.amount,
            timestamp: transaction.timestamp,
        });
        self.ids.insert(transaction.transaction_id.clone());

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.ids.remove(&evicted.transaction_id);
            }
        }

        if self.entries.len() > self.capacity || self.ids.len() != self.entries.len() {
            return Err(PipelineError::StateInconsistency(format!(
                "history holds {} entries ({} ids) with capacity {}",
                self.entries.len(),
                self.ids.len(),
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Static prior weight of each feature, used for attribution
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureImportance {
    weights: BTreeMap<Feature, f64>,
}

impl FeatureImportance {
    /// Built-in priors; they sum to 1.0
    pub fn standard() -> Self {
        let weights = [
            (Feature::Amount, 0.04),
            (Feature::AmountLog, 0.06),
            (Feature::TimeOfDay, 0.03),
            (Feature::DayOfWeek, 0.01),
            (Feature::IsWeekend, 0.01),
            (Feature::AccountAgeDays, 0.09),
            (Feature::TxnCount24h, 0.06),
            (Feature::TxnCount7d, 0.04),
            (Feature::AvgAmount30d, 0.03),
            (Feature::TxnFrequency, 0.03),
            (Feature::IsFirstTransaction, 0.07),
            (Feature::AmountRatioVsAvg, 0.10),
            (Feature::TimeSinceLastTxnMinutes, 0.05),
            (Feature::DeviceAgeDays, 0.05),
            (Feature::IpCountryMatch, 0.06),
            (Feature::BillingShippingMatch, 0.05),
            (Feature::MerchantFraudRate30d, 0.07),
            (Feature::MerchantAvgAmount, 0.02),
            (Feature::PaymentMethodRiskScore, 0.08),
            (Feature::IsCrypto, 0.05),
        ];
        Self {
            weights: weights.into_iter().collect(),
        }
    }

    /// Replace the priors with a named table; features left out have no weight
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self, ConfigurationError> {
        let mut weights = BTreeMap::new();
        for (name, &weight) in map {
            let feature: Feature = name.parse()?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigurationError::InvalidParameter {
                    name: "feature_importance",
                    value: weight,
                });
            }
            weights.insert(feature, weight);
        }
        Ok(Self { weights })
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.weights.get(&feature).copied()
    }

    /// Weight of a feature, zero when absent
    pub fn weight(&self, feature: Feature) -> f64 {
        self.get(feature).unwrap_or(0.0)
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.weights.contains_key(&feature)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.weights
            .iter()
            .map(|(f, w)| (f.as_str().to_string(), *w))
            .collect()
    }
}

impl Default for FeatureImportance {
    fn default() -> Self {
        Self::standard()
    }
}

/// Process-wide store of customer histories
pub struct FeatureStore {
    histories: DashMap<String, Arc<Mutex<UserHistory>>>,
    account_ages: DashMap<String, f64>,
    accounts: Arc<dyn AccountAgeProvider>,
    devices: Arc<dyn DeviceSignalProvider>,
    merchants: Arc<dyn MerchantRiskLookup>,
    config: FeatureStoreConfig,
}

impl FeatureStore {
    /// Create a feature store with explicit collaborators
    pub fn new(
        config: FeatureStoreConfig,
        accounts: Arc<dyn AccountAgeProvider>,
        devices: Arc<dyn DeviceSignalProvider>,
        merchants: Arc<dyn MerchantRiskLookup>,
    ) -> Self {
        Self {
            histories: DashMap::new(),
            account_ages: DashMap::new(),
            accounts,
            devices,
            merchants,
            config,
        }
    }

    /// Create a feature store backed by the static tables in the configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.feature_store.clone(),
            Arc::new(StaticAccountDirectory::new()),
            Arc::new(PassThroughSignals::default()),
            Arc::new(StaticMerchantTable::new(config.merchants.iter().cloned())),
        )
    }

    /// Extract features for a transaction from the current history.
    ///
    /// Does not record the transaction.
    pub fn extract(&self, transaction: &Transaction) -> PipelineResult<FeatureVector> {
        self.with_customer(transaction.customer_key(), |session| {
            session.extract(transaction)
        })
    }

    /// Append a transaction to its customer's history
    pub fn record(&self, transaction: &Transaction) -> PipelineResult<()> {
        self.with_customer(transaction.customer_key(), |session| {
            session.record(transaction)
        })
    }

    /// Run `f` while holding exclusive access to one customer's history.
    ///
    /// Extraction and recording inside the same call observe no interleaving
    /// from concurrent assessments for that customer.
    pub fn with_customer<T, F>(&self, customer_key: &str, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&mut CustomerSession<'_>) -> PipelineResult<T>,
    {
        let slot = self
            .histories
            .entry(customer_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserHistory::new(self.config.history_capacity))))
            .value()
            .clone();

        let mut history = slot.lock().map_err(|_| {
            PipelineError::StateInconsistency(format!(
                "history lock for customer {} is poisoned",
                customer_key
            ))
        })?;

        let mut session = CustomerSession {
            store: self,
            customer_key,
            history: &mut *history,
        };
        f(&mut session)
    }

    /// Number of remembered transactions for a customer
    pub fn history_len(&self, customer_key: &str) -> usize {
        self.histories
            .get(customer_key)
            .and_then(|slot| slot.lock().ok().map(|h| h.len()))
            .unwrap_or(0)
    }

    /// Ids of a customer's remembered transactions, oldest first
    pub fn history_ids(&self, customer_key: &str) -> Vec<String> {
        self.histories
            .get(customer_key)
            .and_then(|slot| {
                slot.lock().ok().map(|h| {
                    h.entries()
                        .map(|e| e.transaction_id.clone())
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    pub fn customer_count(&self) -> usize {
        self.histories.len()
    }

    /// Static feature importance priors
    pub fn feature_importance() -> FeatureImportance {
        FeatureImportance::standard()
    }

    /// Number of features produced
    pub fn feature_count(&self) -> usize {
        Feature::COUNT
    }

    /// Feature names in schema order
    pub fn feature_names(&self) -> Vec<&'static str> {
        Feature::ALL.iter().map(|f| f.as_str()).collect()
    }

    /// Account age, asked from the provider once per customer and then reused
    fn account_age_days(&self, customer_key: &str) -> f64 {
        *self
            .account_ages
            .entry(customer_key.to_string())
            .or_insert_with(|| {
                self.accounts
                    .account_age_days(customer_key)
                    .filter(|days| days.is_finite() && *days >= 0.0)
                    .unwrap_or(self.config.default_account_age_days)
            })
    }

    fn compute(&self, history: &UserHistory, tx: &Transaction) -> PipelineResult<FeatureVector> {
        let datetime = tx.datetime().ok_or_else(|| {
            PipelineError::FeatureExtraction(format!(
                "timestamp {} is out of range",
                tx.timestamp
            ))
        })?;
        let now = tx.timestamp;
        let mut features = FeatureVector::zeros();

        // Basic
        features.set(Feature::Amount, (tx.amount / AMOUNT_SCALE).min(1.0));
        features.set(Feature::AmountLog, tx.amount.ln_1p() / AMOUNT_SCALE.ln_1p());
        features.set(Feature::TimeOfDay, datetime.hour() as f64 / 24.0);
        let day = datetime.weekday().num_days_from_sunday();
        features.set(Feature::DayOfWeek, day as f64 / 7.0);
        features.set(Feature::IsWeekend, flag(day == 0 || day == 6));

        // User behavior. Only entries dated at or before the transaction count.
        let mut count_24h = 0usize;
        let mut count_7d = 0usize;
        let mut count_30d = 0usize;
        let mut avg_30d = 0.0;
        let mut previous: Option<i64> = None;
        for entry in history.entries() {
            let age = now - entry.timestamp;
            if age < 0 {
                continue;
            }
            previous = Some(previous.map_or(entry.timestamp, |p| p.max(entry.timestamp)));
            if age <= DAY_MS {
                count_24h += 1;
            }
            if age <= 7 * DAY_MS {
                count_7d += 1;
            }
            if age <= 30 * DAY_MS {
                count_30d += 1;
                // running mean stays finite for any finite amounts
                avg_30d += (entry.amount - avg_30d) / count_30d as f64;
            }
        }

        let account_age = self.account_age_days(tx.customer_key());
        features.set(Feature::AccountAgeDays, account_age.min(AGE_DAYS_CAP) / AGE_DAYS_CAP);
        features.set(Feature::TxnCount24h, (count_24h as f64).min(TXN_24H_CAP) / TXN_24H_CAP);
        features.set(Feature::TxnCount7d, (count_7d as f64).min(TXN_7D_CAP) / TXN_7D_CAP);
        features.set(Feature::AvgAmount30d, avg_30d / AVG_AMOUNT_SCALE);
        features.set(
            Feature::TxnFrequency,
            (count_7d as f64 / 7.0).min(FREQUENCY_CAP) / FREQUENCY_CAP,
        );
        features.set(Feature::IsFirstTransaction, flag(previous.is_none()));

        // Velocity
        match previous {
            None => {
                features.set(Feature::AmountRatioVsAvg, 1.0);
                features.set(Feature::TimeSinceLastTxnMinutes, 1.0);
            }
            Some(last) => {
                let ratio = if avg_30d > 0.0 { tx.amount / avg_30d } else { 1.0 };
                features.set(
                    Feature::AmountRatioVsAvg,
                    ratio.min(AMOUNT_RATIO_CAP) / AMOUNT_RATIO_CAP,
                );
                let minutes = (now - last) as f64 / MINUTE_MS as f64;
                features.set(
                    Feature::TimeSinceLastTxnMinutes,
                    minutes.min(MINUTES_SINCE_LAST_CAP) / MINUTES_SINCE_LAST_CAP,
                );
            }
        }

        // Device / location
        let signals = self.devices.signals(tx);
        if !signals.device_age_days.is_finite() || signals.device_age_days < 0.0 {
            return Err(PipelineError::FeatureExtraction(format!(
                "device signal provider returned device age {}",
                signals.device_age_days
            )));
        }
        features.set(
            Feature::DeviceAgeDays,
            signals.device_age_days.min(AGE_DAYS_CAP) / AGE_DAYS_CAP,
        );
        features.set(Feature::IpCountryMatch, flag(signals.ip_country_match));
        features.set(Feature::BillingShippingMatch, flag(signals.billing_shipping_match));

        // Merchant
        let merchant = self.merchants.profile(&tx.merchant_id);
        features.set(Feature::MerchantFraudRate30d, merchant.fraud_rate);
        features.set(Feature::MerchantAvgAmount, merchant.avg_amount / AVG_AMOUNT_SCALE);

        // Payment method
        features.set(Feature::PaymentMethodRiskScore, tx.payment_method.base_risk());
        features.set(Feature::IsCrypto, flag(tx.payment_method.is_crypto()));

        features
            .validate()
            .map_err(|e| PipelineError::FeatureExtraction(e.to_string()))?;

        debug!(
            transaction_id = %tx.transaction_id,
            customer = %tx.customer_key(),
            history_len = history.len(),
            "Features extracted"
        );

        Ok(features)
    }
}

/// Exclusive view of one customer's history
pub struct CustomerSession<'a> {
    store: &'a FeatureStore,
    customer_key: &'a str,
    history: &'a mut UserHistory,
}

impl CustomerSession<'_> {
    /// Features for `transaction` against the pre-transaction history
    pub fn extract(&self, transaction: &Transaction) -> PipelineResult<FeatureVector> {
        self.check_owner(transaction)?;
        self.store.compute(&*self.history, transaction)
    }

    /// Append `transaction`; must happen exactly once per transaction
    pub fn record(&mut self, transaction: &Transaction) -> PipelineResult<()> {
        self.check_owner(transaction)?;
        self.history.push(transaction)
    }

    /// Fails when `record` would reject `transaction`, without touching history
    pub fn ensure_recordable(&self, transaction: &Transaction) -> PipelineResult<()> {
        self.check_owner(transaction)?;
        self.history.ensure_unrecorded(&transaction.transaction_id)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn check_owner(&self, transaction: &Transaction) -> PipelineResult<()> {
        if transaction.customer_key() != self.customer_key {
            return Err(PipelineError::StateInconsistency(format!(
                "transaction {} belongs to {}, not {}",
                transaction.transaction_id,
                transaction.customer_key(),
                self.customer_key
            )));
        }
        Ok(())
    }
}

/// Apply `f` to every transaction, results aligned to the input order.
///
/// Customers run in parallel. One customer's transactions run sequentially in
/// timestamp order, ties keeping input order.
pub fn map_by_customer<T, F>(transactions: &[Transaction], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Transaction) -> T + Sync,
{
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, tx) in transactions.iter().enumerate() {
        groups.entry(tx.customer_key()).or_default().push(i);
    }
    let groups: Vec<Vec<usize>> = groups
        .into_values()
        .map(|mut indices| {
            indices.sort_by_key(|&i| transactions[i].timestamp);
            indices
        })
        .collect();

    let mapped: Vec<(usize, T)> = groups
        .par_iter()
        .flat_map_iter(|indices| {
            indices
                .iter()
                .map(|&i| (i, f(&transactions[i])))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut slots: Vec<Option<T>> = (0..transactions.len()).map(|_| None).collect();
    for (i, value) in mapped {
        slots[i] = Some(value);
    }
    slots.into_iter().flatten().collect()
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::MerchantProfile;
    use crate::types::transaction::{DeviceSignals, PaymentMethod};

    // Wednesday 2024-01-10 12:00:00 UTC
    const NOON: i64 = 1_704_888_000_000;

    fn store() -> FeatureStore {
        FeatureStore::new(
            FeatureStoreConfig::default(),
            Arc::new(StaticAccountDirectory::new().with_account("alice", 730.0)),
            Arc::new(PassThroughSignals::default()),
            Arc::new(StaticMerchantTable::new([MerchantProfile::new(
                "shop", 0.02, 250.0,
            )])),
        )
    }

    fn tx(id: &str, amount: f64, timestamp: i64) -> Transaction {
        Transaction::new(id, amount, timestamp, PaymentMethod::CreditCard, "shop")
            .with_customer("alice")
    }

    #[test]
    fn test_empty_history_sentinels() {
        let store = store();
        let features = store.extract(&tx("t1", 100.0, NOON)).unwrap();

        assert_eq!(features.get(Feature::IsFirstTransaction), 1.0);
        assert_eq!(features.get(Feature::AmountRatioVsAvg), 1.0);
        assert_eq!(features.get(Feature::TimeSinceLastTxnMinutes), 1.0);
        assert_eq!(features.get(Feature::TxnCount24h), 0.0);
        assert_eq!(features.get(Feature::AvgAmount30d), 0.0);
        assert_eq!(features.get(Feature::AccountAgeDays), 1.0);
        assert_eq!(features.get(Feature::TimeOfDay), 0.5);
        assert_eq!(features.get(Feature::DayOfWeek), 3.0 / 7.0);
        assert_eq!(features.get(Feature::IsWeekend), 0.0);
        assert_eq!(features.get(Feature::MerchantFraudRate30d), 0.02);
        assert_eq!(features.get(Feature::MerchantAvgAmount), 0.25);
        assert_eq!(features.get(Feature::PaymentMethodRiskScore), 0.3);
        assert_eq!(features.get(Feature::IsCrypto), 0.0);
        assert_eq!(features.get(Feature::Amount), 0.01);
    }

    #[test]
    fn test_history_derived_features() {
        let store = store();
        store.record(&tx("t1", 100.0, NOON - 2 * DAY_MS)).unwrap();
        store.record(&tx("t2", 200.0, NOON - 3 * 60 * MINUTE_MS)).unwrap();

        let features = store.extract(&tx("t3", 450.0, NOON)).unwrap();

        assert_eq!(features.get(Feature::IsFirstTransaction), 0.0);
        assert!((features.get(Feature::TxnCount24h) - 0.1).abs() < 1e-12);
        assert!((features.get(Feature::TxnCount7d) - 2.0 / 50.0).abs() < 1e-12);
        assert!((features.get(Feature::AvgAmount30d) - 0.15).abs() < 1e-12);
        assert!((features.get(Feature::TxnFrequency) - (2.0 / 7.0) / 5.0).abs() < 1e-12);
        // 450 / 150 = 3x average
        assert!((features.get(Feature::AmountRatioVsAvg) - 0.6).abs() < 1e-12);
        assert!((features.get(Feature::TimeSinceLastTxnMinutes) - 180.0 / 1440.0).abs() < 1e-12);
    }

    #[test]
    fn test_stale_history_ratio_guard() {
        let store = store();
        store.record(&tx("old", 80.0, NOON - 45 * DAY_MS)).unwrap();

        let features = store.extract(&tx("new", 5000.0, NOON)).unwrap();
        assert_eq!(features.get(Feature::AvgAmount30d), 0.0);
        assert!((features.get(Feature::AmountRatioVsAvg) - 0.2).abs() < 1e-12);
        assert_eq!(features.get(Feature::TimeSinceLastTxnMinutes), 1.0);
    }

    #[test]
    fn test_later_dated_history_is_ignored() {
        let store = store();
        store.record(&tx("later", 900.0, NOON + 60 * MINUTE_MS)).unwrap();

        let features = store.extract(&tx("earlier", 100.0, NOON)).unwrap();
        assert_eq!(features.get(Feature::TxnCount24h), 0.0);
        assert_eq!(features.get(Feature::IsFirstTransaction), 1.0);
        assert_eq!(features.get(Feature::AmountRatioVsAvg), 1.0);
        assert_eq!(features.get(Feature::TimeSinceLastTxnMinutes), 1.0);

        store.record(&tx("before", 100.0, NOON - 30 * MINUTE_MS)).unwrap();
        let features = store.extract(&tx("earlier", 100.0, NOON)).unwrap();
        assert_eq!(features.get(Feature::IsFirstTransaction), 0.0);
        assert!((features.get(Feature::TxnCount24h) - 0.1).abs() < 1e-12);
        assert!((features.get(Feature::TimeSinceLastTxnMinutes) - 30.0 / 1440.0).abs() < 1e-12);
        assert!((features.get(Feature::AmountRatioVsAvg) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_huge_amounts_keep_average_finite() {
        let store = store();
        let huge = f64::MAX / 1.5;
        store.record(&tx("h1", huge, NOON - 2 * 60 * MINUTE_MS)).unwrap();
        store.record(&tx("h2", huge, NOON - 60 * MINUTE_MS)).unwrap();

        let features = store.extract(&tx("t3", 100.0, NOON)).unwrap();
        let avg = features.get(Feature::AvgAmount30d);
        assert!(avg.is_finite());
        assert!((avg - huge / 1_000.0).abs() <= huge / 1_000.0 * 1e-12);
        assert!(features.get(Feature::AmountRatioVsAvg) < 1e-12);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let store = store();
        store.record(&tx("t1", 60.0, NOON - DAY_MS)).unwrap();

        let next = tx("t2", 75.0, NOON);
        let first = store.extract(&next).unwrap();
        let second = store.extract(&next).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.history_len("alice"), 1);
    }

    #[test]
    fn test_amount_log_monotonic() {
        let store = store();
        let mut previous = -1.0;
        for amount in [0.5, 1.0, 10.0, 999.0, 10_000.0, 50_000.0] {
            let value = store
                .extract(&tx("t", amount, NOON))
                .unwrap()
                .get(Feature::AmountLog);
            assert!(value > previous);
            previous = value;
        }
    }

    #[test]
    fn test_time_since_last_monotonic() {
        let store = store();
        store.record(&tx("t1", 50.0, NOON)).unwrap();

        let near = store
            .extract(&tx("t2", 50.0, NOON + 10 * MINUTE_MS))
            .unwrap()
            .get(Feature::TimeSinceLastTxnMinutes);
        let far = store
            .extract(&tx("t2", 50.0, NOON + 600 * MINUTE_MS))
            .unwrap()
            .get(Feature::TimeSinceLastTxnMinutes);
        assert!(near < far);
        assert!(far < 1.0);
    }

    #[test]
    fn test_history_fifo_bound() {
        let store = store();
        for i in 0..1001 {
            store
                .record(&tx(&format!("t{}", i), 10.0, NOON + i as i64 * MINUTE_MS))
                .unwrap();
        }
        assert_eq!(store.history_len("alice"), 1000);
        let ids = store.history_ids("alice");
        assert_eq!(ids.first().map(String::as_str), Some("t1"));
        assert_eq!(ids.last().map(String::as_str), Some("t1000"));
    }

    #[test]
    fn test_double_record_is_inconsistent() {
        let store = store();
        let t = tx("dup", 10.0, NOON);
        store.record(&t).unwrap();
        let err = store.record(&t).unwrap_err();
        assert!(matches!(err, PipelineError::StateInconsistency(_)));
        assert_eq!(store.history_len("alice"), 1);
    }

    #[test]
    fn test_account_age_is_cached() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl AccountAgeProvider for Counting {
            fn account_age_days(&self, _: &str) -> Option<f64> {
                let calls = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Some(10.0 + calls as f64 * 100.0)
            }
        }

        let provider = Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        let store = FeatureStore::new(
            FeatureStoreConfig::default(),
            provider.clone(),
            Arc::new(PassThroughSignals::default()),
            Arc::new(StaticMerchantTable::default()),
        );

        let a = store.extract(&tx("t1", 10.0, NOON)).unwrap();
        let b = store.extract(&tx("t2", 10.0, NOON)).unwrap();
        assert_eq!(a.get(Feature::AccountAgeDays), b.get(Feature::AccountAgeDays));
        assert_eq!(provider.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_signals_and_anonymous_bucket() {
        let store = store();
        let signals = DeviceSignals {
            device_age_days: 730.0,
            ip_country_match: false,
            billing_shipping_match: true,
        };
        let t = Transaction::new("anon", 20.0, NOON, PaymentMethod::Crypto, "unknown_shop")
            .with_device(signals);
        let features = store.extract(&t).unwrap();

        assert_eq!(features.get(Feature::DeviceAgeDays), 1.0);
        assert_eq!(features.get(Feature::IpCountryMatch), 0.0);
        assert_eq!(features.get(Feature::BillingShippingMatch), 1.0);
        assert_eq!(features.get(Feature::MerchantFraudRate30d), 0.08);
        assert_eq!(features.get(Feature::MerchantAvgAmount), 0.1);
        assert_eq!(features.get(Feature::IsCrypto), 1.0);
        assert_eq!(features.get(Feature::AccountAgeDays), 0.0);

        store.record(&t).unwrap();
        assert_eq!(store.history_len("anonymous"), 1);
    }

    #[test]
    fn test_session_rejects_foreign_transaction() {
        let store = store();
        let foreign = tx("t1", 10.0, NOON).with_customer("bob");
        let err = store
            .with_customer("alice", |session| session.extract(&foreign))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StateInconsistency(_)));
    }

    #[test]
    fn test_feature_importance_priors() {
        let importance = FeatureStore::feature_importance();
        assert!((importance.total() - 1.0).abs() < 1e-9);
        for feature in Feature::ALL {
            assert!(importance.contains(feature));
        }

        let mut partial = HashMap::new();
        partial.insert("amount".to_string(), 0.5);
        let importance = FeatureImportance::from_map(&partial).unwrap();
        assert_eq!(importance.weight(Feature::Amount), 0.5);
        assert!(!importance.contains(Feature::IsCrypto));

        partial.insert("bogus".to_string(), 0.1);
        assert!(FeatureImportance::from_map(&partial).is_err());
    }

    #[test]
    fn test_map_by_customer_orders_each_customer() {
        let batch = vec![
            tx("a3", 1.0, NOON + 2 * MINUTE_MS),
            tx("b1", 1.0, NOON).with_customer("bob"),
            tx("a1", 1.0, NOON),
            tx("a2", 1.0, NOON + MINUTE_MS),
        ];
        let seen = Mutex::new(Vec::new());
        let ids = map_by_customer(&batch, |t| {
            if let Ok(mut seen) = seen.lock() {
                seen.push(t.transaction_id.clone());
            }
            t.transaction_id.clone()
        });

        assert_eq!(ids, vec!["a3", "b1", "a1", "a2"]);
        let alice: Vec<String> = seen
            .into_inner()
            .unwrap()
            .into_iter()
            .filter(|id| id.starts_with('a'))
            .collect();
        assert_eq!(alice, vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn test_feature_names() {
        let store = store();
        assert_eq!(store.feature_count(), 20);
        assert_eq!(store.feature_names().len(), 20);
        assert_eq!(store.feature_names()[0], "amount");
    }
}
