//! Test Transaction Producer
//!
//! Generates and publishes payment transactions to NATS for pipeline testing.
//! Regular customers repeat small purchases at familiar merchants; suspicious
//! traffic uses large amounts, crypto, fresh devices and mismatched locations.

use chrono::Utc;
use rand::rngs::ThreadRng;
use rand::Rng;
use risk_scoring_pipeline::types::transaction::{DeviceSignals, PaymentMethod, Transaction};
use std::time::Duration;
use tracing::{info, warn};

const MERCHANTS: &[&str] = &[
    "amazon",
    "grocery_mart",
    "electronics_hub",
    "travel_direct",
    "crypto_exchange",
    "gift_card_store",
];

/// Transaction generator for testing
struct TransactionGenerator {
    rng: ThreadRng,
    transaction_counter: u64,
    customers: u32,
}

impl TransactionGenerator {
    fn new(customers: u32) -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
            customers: customers.max(1),
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    /// A purchase from a returning customer
    fn generate_regular(&mut self) -> Transaction {
        let id = self.next_id();
        let method = *self.random_choice(&[
            PaymentMethod::CreditCard,
            PaymentMethod::CreditCard,
            PaymentMethod::DebitCard,
            PaymentMethod::BankTransfer,
        ]);
        let merchant = *self.random_choice(&MERCHANTS[..4]);
        let customer = format!("cust_{:05}", self.rng.gen_range(0..self.customers));

        Transaction::new(
            id,
            (self.rng.gen_range(5.0..300.0_f64) * 100.0).round() / 100.0,
            Utc::now().timestamp_millis(),
            method,
            merchant,
        )
        .with_customer(customer)
        .with_device(DeviceSignals {
            device_age_days: self.rng.gen_range(30.0..900.0),
            ip_country_match: self.rng.gen_bool(0.97),
            billing_shipping_match: self.rng.gen_bool(0.95),
        })
    }

    /// A high-value purchase from a brand-new identity
    fn generate_suspicious(&mut self) -> Transaction {
        let id = self.next_id();
        let method = *self.random_choice(&[PaymentMethod::Crypto, PaymentMethod::CreditCard]);
        let merchant = *self.random_choice(&MERCHANTS[2..]);
        let customer = format!("new_{:08x}", self.rng.gen::<u32>());

        Transaction::new(
            id,
            (self.rng.gen_range(1_000.0..10_000.0_f64) * 100.0).round() / 100.0,
            Utc::now().timestamp_millis(),
            method,
            merchant,
        )
        .with_customer(customer)
        .with_device(DeviceSignals {
            device_age_days: self.rng.gen_range(0.0..3.0),
            ip_country_match: self.rng.gen_bool(0.3),
            billing_shipping_match: self.rng.gen_bool(0.4),
        })
    }

    fn generate(&mut self, suspicious_rate: f64) -> (Transaction, bool) {
        if self.rng.gen_bool(suspicious_rate) {
            (self.generate_suspicious(), true)
        } else {
            (self.generate_regular(), false)
        }
    }

    fn random_choice<'a, T>(&mut self, choices: &'a [T]) -> &'a T {
        &choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("payments.transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let suspicious_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let customers: u32 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(50);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        suspicious_rate = suspicious_rate,
        delay_ms = delay_ms,
        customers = customers,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, suspicious_rate, delay_ms, customers).await;
        }
    };

    let mut generator = TransactionGenerator::new(customers);
    info!("Starting to publish {} transactions...", count);

    let mut regular_count = 0;
    let mut suspicious_count = 0;

    for i in 0..count {
        let (transaction, suspicious) = generator.generate(suspicious_rate);
        if suspicious {
            suspicious_count += 1;
        } else {
            regular_count += 1;
        }

        let payload = serde_json::to_vec(&transaction)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} transactions ({} regular, {} suspicious)",
                i + 1,
                count,
                regular_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    client.flush().await?;
    info!(
        "Completed! Published {} transactions ({} regular, {} suspicious)",
        count, regular_count, suspicious_count
    );

    Ok(())
}

async fn run_dry_mode(
    count: u64,
    suspicious_rate: f64,
    delay_ms: u64,
    customers: u32,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new(customers);

    for i in 0..count {
        let (transaction, suspicious) = generator.generate(suspicious_rate);
        let json = serde_json::to_string_pretty(&transaction)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!(suspicious, "Sample transaction {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
