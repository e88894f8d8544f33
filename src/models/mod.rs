//! Fraud scoring models

pub mod ensemble;
pub mod scorer;

pub use ensemble::{DecisionTree, RiskModel, TreeEnsemble, TreeNode};
pub use scorer::Scorer;
