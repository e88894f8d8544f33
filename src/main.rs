//! Risk Scoring Pipeline - Main Entry Point
//!
//! Consumes payment transactions from NATS, assesses their fraud risk and
//! publishes the assessments. Customers are spread over a fixed set of
//! workers; each worker assesses its messages in arrival order.

use anyhow::{Context, Result};
use futures::StreamExt;
use async_nats::Subject;
use risk_scoring_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_transaction, worker_for, TransactionConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::RiskPipeline,
    producer::{AssessmentFailure, AssessmentProducer},
    types::transaction::Transaction,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("risk_scoring_pipeline={}", logging.level)))
        .context("Invalid log level")?;
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

struct Job {
    transaction: Transaction,
    reply: Option<Subject>,
}

/// Assess one worker's queue in order
async fn run_worker(
    id: usize,
    mut jobs: mpsc::Receiver<Job>,
    pipeline: Arc<RiskPipeline>,
    producer: Arc<AssessmentProducer>,
    processed_count: Arc<AtomicU64>,
) {
    while let Some(Job { transaction, reply }) = jobs.recv().await {
        let tx_id = transaction.transaction_id.clone();

        let assess = pipeline.clone();
        let result = match tokio::task::spawn_blocking(move || assess.assess_risk(&transaction)).await {
            Ok(result) => result,
            Err(e) => {
                error!(worker = id, transaction_id = %tx_id, error = %e, "Assessment task failed");
                continue;
            }
        };

        match result {
            Ok(assessment) => {
                if let Err(e) = producer.publish_assessment(&assessment, reply).await {
                    error!(
                        transaction_id = %tx_id,
                        error = %e,
                        "Failed to publish risk assessment"
                    );
                }

                let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 {
                    let throughput = pipeline.metrics().get_throughput();
                    let processing_stats = pipeline.metrics().get_processing_stats();
                    info!(
                        processed = count,
                        throughput = format!("{:.1} tx/s", throughput),
                        avg_latency_us = processing_stats.mean_us,
                        "Processing milestone"
                    );
                }
            }
            Err(e) => {
                let failure = AssessmentFailure::from_error(Some(tx_id.clone()), &e);
                if let Err(e) = producer.publish_failure(&failure, reply).await {
                    error!(
                        transaction_id = %tx_id,
                        error = %e,
                        "Failed to publish assessment failure"
                    );
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.toml".to_string());
    let config = AppConfig::load_from_path(&config_path)?;
    init_logging(&config.logging)?;

    info!("Starting Risk Scoring Pipeline");
    info!(path = %config_path, "Configuration loaded successfully");
    info!(
        "Decision thresholds: approve<{:.2}, decline>={:.2}, chargeback cost {:.2}",
        config.scoring.approve_threshold,
        config.scoring.decline_threshold,
        config.optimizer.chargeback_cost
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(
        RiskPipeline::new(&config)
            .context("Invalid scoring configuration")?
            .with_metrics(metrics.clone()),
    );
    info!(
        merchants = config.merchants.len(),
        features = pipeline.feature_store().feature_count(),
        "Risk pipeline ready"
    );

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let producer = Arc::new(AssessmentProducer::new(
        client.clone(),
        &config.nats.assessment_subject,
        &config.nats.error_subject,
    ));

    let num_workers = config.pipeline.workers.max(1);
    info!(
        "Starting transaction processing with {} customer-sharded workers",
        num_workers
    );
    info!("Listening on subject: {}", config.nats.transaction_subject);
    info!(
        "Publishing assessments to: {} (errors to {})",
        config.nats.assessment_subject, config.nats.error_subject
    );

    let processed_count = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.stats_interval_secs);
    tokio::spawn(reporter.start());

    let mut queues = Vec::with_capacity(num_workers);
    let mut workers = Vec::with_capacity(num_workers);
    for id in 0..num_workers {
        let (sender, receiver) = mpsc::channel(config.pipeline.queue_depth.max(1));
        queues.push(sender);
        workers.push(tokio::spawn(run_worker(
            id,
            receiver,
            pipeline.clone(),
            producer.clone(),
            processed_count.clone(),
        )));
    }

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let reply = message.reply.clone();

        let transaction = match decode_transaction(&message.payload) {
            Ok(transaction) => transaction,
            Err((transaction_id, e)) => {
                warn!(error = %e, "Failed to deserialize transaction");
                let failure = AssessmentFailure::malformed(transaction_id, &e);
                if let Err(e) = producer.publish_failure(&failure, reply).await {
                    error!(error = %e, "Failed to publish assessment failure");
                }
                continue;
            }
        };

        let worker = worker_for(transaction.customer_key(), num_workers);
        if queues[worker].send(Job { transaction, reply }).await.is_err() {
            error!(worker, "Worker stopped; no longer accepting transactions");
            break;
        }
    }

    info!("Pipeline shutting down...");
    drop(queues);
    for handle in workers {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker exited abnormally");
        }
    }
    metrics.print_summary();

    Ok(())
}
