//! Payment Risk Scoring Pipeline Library
//!
//! Scores payment transactions for fraud risk from per-customer history,
//! explains each score, and turns it into a revenue-aware
//! approve/review/decline decision.

pub mod config;
pub mod consumer;
pub mod error;
pub mod explainer;
pub mod feature_store;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod pipeline;
pub mod prediction_log;
pub mod producer;
pub mod signals;
pub mod types;

pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use error::{ConfigurationError, FailureStage, PipelineError, PipelineResult, ValidationError};
pub use explainer::Explainer;
pub use feature_store::FeatureStore;
pub use models::Scorer;
pub use optimizer::DecisionOptimizer;
pub use pipeline::{RiskAssessment, RiskPipeline};
pub use producer::AssessmentProducer;
pub use types::{
    prediction::ModelPrediction, optimization::OptimizationResult, transaction::Transaction,
};
