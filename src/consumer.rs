//! NATS message consumer for incoming payment transactions

use crate::types::transaction::Transaction;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::info;

/// Consumer for receiving transactions from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[derive(Deserialize)]
struct IdOnly {
    #[serde(alias = "id")]
    transaction_id: Option<String>,
}

/// Decode a message payload into a transaction.
///
/// On failure, also returns the transaction id when the payload carried one,
/// so the rejection can be correlated by the sender.
pub fn decode_transaction(payload: &[u8]) -> Result<Transaction, (Option<String>, serde_json::Error)> {
    serde_json::from_slice::<Transaction>(payload).map_err(|e| {
        let id = serde_json::from_slice::<IdOnly>(payload)
            .ok()
            .and_then(|p| p.transaction_id);
        (id, e)
    })
}

/// Worker that owns a customer's transactions.
///
/// Every message for one customer lands on the same worker, so its
/// transactions are assessed in arrival order.
pub fn worker_for(customer_key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    customer_key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}
