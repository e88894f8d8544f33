//! Payment transaction data structures

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// History bucket used for transactions without a customer id.
pub const ANONYMOUS_CUSTOMER: &str = "anonymous";

/// Payment method tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Crypto,
    CreditCard,
    DebitCard,
    BankTransfer,
    #[serde(other)]
    Unknown,
}

impl PaymentMethod {
    /// Base risk score for the payment method
    pub fn base_risk(&self) -> f64 {
        match self {
            PaymentMethod::Crypto => 0.6,
            PaymentMethod::CreditCard => 0.3,
            PaymentMethod::DebitCard => 0.25,
            PaymentMethod::BankTransfer => 0.2,
            PaymentMethod::Unknown => 0.5,
        }
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, PaymentMethod::Crypto)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Device and location signals supplied alongside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSignals {
    /// Days since the device was first seen
    pub device_age_days: f64,
    /// IP geolocation country matches the account country
    pub ip_country_match: bool,
    /// Billing address matches shipping address
    pub billing_shipping_match: bool,
}

impl Default for DeviceSignals {
    fn default() -> Self {
        Self {
            device_age_days: 30.0,
            ip_country_match: true,
            billing_shipping_match: true,
        }
    }
}

/// A payment transaction submitted for risk assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    #[serde(alias = "id")]
    pub transaction_id: String,

    /// Transaction amount (positive)
    pub amount: f64,

    /// ISO currency code
    pub currency: String,

    /// Epoch milliseconds
    pub timestamp: i64,

    /// Payment method tag
    pub payment_method: PaymentMethod,

    /// Merchant identifier
    pub merchant_id: String,

    /// Merchant display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,

    /// Customer identifier; absent customers share the anonymous bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    /// Device/geo signals passed through from the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSignals>,
}

impl Transaction {
    /// Create a transaction with the required fields
    pub fn new(
        transaction_id: impl Into<String>,
        amount: f64,
        timestamp: i64,
        payment_method: PaymentMethod,
        merchant_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount,
            currency: "USD".to_string(),
            timestamp,
            payment_method,
            merchant_id: merchant_id.into(),
            merchant_name: None,
            customer_id: None,
            device: None,
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_device(mut self, device: DeviceSignals) -> Self {
        self.device = Some(device);
        self
    }

    /// Key of the history bucket this transaction belongs to
    pub fn customer_key(&self) -> &str {
        match self.customer_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => ANONYMOUS_CUSTOMER,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Reject malformed transactions before any state is touched
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.transaction_id.trim().is_empty() {
            return Err(ValidationError::EmptyTransactionId);
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ValidationError::InvalidAmount(self.amount));
        }
        if self.currency.trim().is_empty() {
            return Err(ValidationError::MissingField("currency"));
        }
        if self.merchant_id.trim().is_empty() {
            return Err(ValidationError::MissingField("merchant_id"));
        }
        if self.timestamp < 0 || self.datetime().is_none() {
            return Err(ValidationError::InvalidTimestamp(self.timestamp));
        }
        if let Some(device) = &self.device {
            if !device.device_age_days.is_finite() || device.device_age_days < 0.0 {
                return Err(ValidationError::InvalidField {
                    field: "device.device_age_days",
                    value: device.device_age_days,
                });
            }
        }
        Ok(())
    }
}
