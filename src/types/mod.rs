//! Type definitions for the risk scoring pipeline

pub mod features;
pub mod optimization;
pub mod prediction;
pub mod transaction;

pub use features::{Feature, FeatureVector};
pub use optimization::{DecisionThresholds, OptimizationResult};
pub use prediction::{Decision, ModelPrediction, RiskExplanation};
pub use transaction::{PaymentMethod, Transaction};
