//! Fixed gradient-boosted style tree ensemble

use crate::types::features::{Feature, FeatureVector};
use std::collections::BTreeSet;

/// Anything that maps a feature vector to a base fraud probability.
///
/// The scorer applies rule adjustments, false-decline discounting and
/// thresholds on top, so a trained model can replace the fixed ensemble
/// without touching the rest of the pipeline.
pub trait RiskModel: Send + Sync {
    fn name(&self) -> &str;

    /// Base fraud probability in [0, 1]
    fn probability(&self, features: &FeatureVector) -> f64;

    /// Features the model reads
    fn referenced_features(&self) -> BTreeSet<Feature>;
}

/// Node of a binary decision tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Leaf(f64),
    /// Values `<= threshold` go to `below`, the rest to `above`
    Split {
        feature: Feature,
        threshold: f64,
        below: Box<TreeNode>,
        above: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn split(feature: Feature, threshold: f64, below: TreeNode, above: TreeNode) -> Self {
        TreeNode::Split {
            feature,
            threshold,
            below: Box::new(below),
            above: Box::new(above),
        }
    }

    fn evaluate(&self, features: &FeatureVector) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf(value) => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    below,
                    above,
                } => {
                    node = if features.get(*feature) <= *threshold {
                        below
                    } else {
                        above
                    };
                }
            }
        }
    }

    fn collect_features(&self, out: &mut BTreeSet<Feature>) {
        if let TreeNode::Split {
            feature,
            below,
            above,
            ..
        } = self
        {
            out.insert(*feature);
            below.collect_features(out);
            above.collect_features(out);
        }
    }
}

/// Named shallow tree
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    pub name: &'static str,
    pub root: TreeNode,
}

impl DecisionTree {
    pub fn new(name: &'static str, root: TreeNode) -> Self {
        Self { name, root }
    }

    /// Leaf value reached by the features
    pub fn evaluate(&self, features: &FeatureVector) -> f64 {
        self.root.evaluate(features)
    }
}

/// Sum of tree outputs scaled by a learning rate, squashed by a sigmoid
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    trees: Vec<DecisionTree>,
    learning_rate: f64,
    base_margin: f64,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<DecisionTree>, learning_rate: f64, base_margin: f64) -> Self {
        Self {
            trees,
            learning_rate,
            base_margin,
        }
    }

    /// The fixed five-tree ensemble
    pub fn standard(learning_rate: f64, base_margin: f64) -> Self {
        use Feature::*;
        use TreeNode::Leaf;

        let trees = vec![
            DecisionTree::new(
                "amount_behavior",
                TreeNode::split(
                    AmountRatioVsAvg,
                    0.6,
                    TreeNode::split(AmountLog, 0.75, Leaf(0.1), Leaf(0.4)),
                    TreeNode::split(IsFirstTransaction, 0.5, Leaf(0.6), Leaf(0.9)),
                ),
            ),
            DecisionTree::new(
                "velocity",
                TreeNode::split(
                    TxnCount24h,
                    0.5,
                    TreeNode::split(TimeSinceLastTxnMinutes, 0.01, Leaf(0.4), Leaf(0.1)),
                    TreeNode::split(TimeSinceLastTxnMinutes, 0.05, Leaf(0.9), Leaf(0.5)),
                ),
            ),
            DecisionTree::new(
                "account",
                TreeNode::split(
                    AccountAgeDays,
                    0.1,
                    TreeNode::split(IsFirstTransaction, 0.5, Leaf(0.5), Leaf(0.7)),
                    TreeNode::split(TxnCount7d, 0.2, Leaf(0.2), Leaf(0.05)),
                ),
            ),
            DecisionTree::new(
                "location",
                TreeNode::split(
                    IpCountryMatch,
                    0.5,
                    TreeNode::split(BillingShippingMatch, 0.5, Leaf(0.9), Leaf(0.6)),
                    TreeNode::split(DeviceAgeDays, 0.05, Leaf(0.4), Leaf(0.1)),
                ),
            ),
            DecisionTree::new(
                "merchant_payment",
                TreeNode::split(
                    MerchantFraudRate30d,
                    0.1,
                    TreeNode::split(IsCrypto, 0.5, Leaf(0.1), Leaf(0.4)),
                    TreeNode::split(PaymentMethodRiskScore, 0.5, Leaf(0.5), Leaf(0.8)),
                ),
            ),
        ];

        Self::new(trees, learning_rate, base_margin)
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Leaf value of every tree
    pub fn tree_outputs(&self, features: &FeatureVector) -> Vec<(&'static str, f64)> {
        self.trees
            .iter()
            .map(|tree| (tree.name, tree.evaluate(features)))
            .collect()
    }

    /// Log-odds before the sigmoid
    pub fn margin(&self, features: &FeatureVector) -> f64 {
        let sum: f64 = self.trees.iter().map(|tree| tree.evaluate(features)).sum();
        self.base_margin + self.learning_rate * sum
    }
}

impl RiskModel for TreeEnsemble {
    fn name(&self) -> &str {
        "tree_ensemble"
    }

    fn probability(&self, features: &FeatureVector) -> f64 {
        sigmoid(self.margin(features))
    }

    fn referenced_features(&self) -> BTreeSet<Feature> {
        let mut out = BTreeSet::new();
        for tree in &self.trees {
            tree.root.collect_features(&mut out);
        }
        out
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
