//! Bounded rolling log of recent assessments.
//!
//! Feeds the real-time statistics, live model metrics once outcomes are
//! labelled, and the threshold search.

use crate::error::{PipelineError, PipelineResult};
use crate::types::optimization::{LabeledOutcome, OptimizationResult};
use crate::types::prediction::{Decision, GroundTruth, MetricsSource, ModelMetrics, ModelPrediction};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// One logged assessment
#[derive(Debug, Clone)]
pub struct LoggedAssessment {
    pub prediction: ModelPrediction,
    pub optimization: OptimizationResult,
}

impl LoggedAssessment {
    pub fn final_decision(&self) -> Decision {
        self.optimization.optimized_decision
    }
}

/// Aggregates over the logged predictions. Rates are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealTimeStats {
    pub total_predictions: usize,
    pub approval_rate: f64,
    pub avg_risk_score: f64,
    pub false_decline_rate: f64,
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<LoggedAssessment>,
    labels: HashMap<String, GroundTruth>,
}

/// Ring buffer of assessments plus outcome labels for the entries it holds
#[derive(Debug)]
pub struct PredictionLog {
    state: RwLock<LogState>,
    capacity: usize,
}

impl PredictionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(LogState {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                labels: HashMap::new(),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn poisoned() -> PipelineError {
        PipelineError::StateInconsistency("prediction log lock is poisoned".to_string())
    }

    /// Append an assessment, evicting the oldest entry and its label when full
    pub fn push(&self, prediction: ModelPrediction, optimization: OptimizationResult) -> PipelineResult<()> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        if self.capacity == 0 {
            return Ok(());
        }
        while state.entries.len() >= self.capacity {
            if let Some(evicted) = state.entries.pop_front() {
                let id = evicted.prediction.transaction_id;
                state.labels.remove(&id);
            }
        }
        state.entries.push_back(LoggedAssessment {
            prediction,
            optimization,
        });
        Ok(())
    }

    /// Attach an outcome label. Returns false when the transaction is not in the log.
    pub fn record_outcome(&self, transaction_id: &str, truth: GroundTruth) -> PipelineResult<bool> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let known = state
            .entries
            .iter()
            .any(|e| e.prediction.transaction_id == transaction_id);
        if known {
            state.labels.insert(transaction_id.to_string(), truth);
        }
        Ok(known)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labeled_count(&self) -> usize {
        self.state.read().map(|s| s.labels.len()).unwrap_or(0)
    }

    pub fn real_time_stats(&self) -> PipelineResult<RealTimeStats> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let total = state.entries.len();
        if total == 0 {
            return Ok(RealTimeStats::default());
        }
        let n = total as f64;

        let approved = state
            .entries
            .iter()
            .filter(|e| e.final_decision() == Decision::Approve)
            .count();
        let risk_sum: f64 = state
            .entries
            .iter()
            .map(|e| e.prediction.risk_score as f64)
            .sum();
        let likely_false_declines = state
            .entries
            .iter()
            .filter(|e| {
                e.final_decision() == Decision::Decline && e.prediction.false_decline_risk > 0.5
            })
            .count();

        Ok(RealTimeStats {
            total_predictions: total,
            approval_rate: approved as f64 / n * 100.0,
            avg_risk_score: risk_sum / n,
            false_decline_rate: likely_false_declines as f64 / n * 100.0,
        })
    }

    /// Confusion-matrix metrics over labelled entries, `None` without labels.
    ///
    /// A prediction counts as positive when its final decision is not approve.
    pub fn model_metrics(&self) -> PipelineResult<Option<ModelMetrics>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let labelled: Vec<(&LoggedAssessment, bool)> = state
            .entries
            .iter()
            .filter_map(|e| {
                state
                    .labels
                    .get(&e.prediction.transaction_id)
                    .map(|t| (e, t.is_fraud))
            })
            .collect();
        if labelled.is_empty() {
            return Ok(None);
        }

        let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
        let mut declined_legit = 0usize;
        for (entry, is_fraud) in &labelled {
            let flagged = entry.final_decision() != Decision::Approve;
            match (flagged, *is_fraud) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
            if !is_fraud && entry.final_decision() == Decision::Decline {
                declined_legit += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let scores: Vec<(f64, bool)> = labelled
            .iter()
            .map(|(e, is_fraud)| (e.prediction.adjusted_score, *is_fraud))
            .collect();

        Ok(Some(ModelMetrics {
            accuracy: ratio(tp + tn, labelled.len()),
            precision,
            recall,
            f1_score,
            auc: rank_auc(&scores).unwrap_or(ModelMetrics::default().auc),
            false_positive_rate: ratio(fp, fp + tn),
            false_negative_rate: ratio(fn_, tp + fn_),
            false_decline_rate: ratio(declined_legit, fp + tn),
            source: MetricsSource::Measured,
            labeled_samples: labelled.len(),
        }))
    }

    /// Labelled entries as inputs for the threshold search
    pub fn labeled_outcomes(&self) -> PipelineResult<Vec<LabeledOutcome>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state
            .entries
            .iter()
            .filter_map(|e| {
                state
                    .labels
                    .get(&e.prediction.transaction_id)
                    .map(|t| LabeledOutcome {
                        adjusted_score: e.prediction.adjusted_score,
                        amount: e.optimization.amount,
                        is_fraud: t.is_fraud,
                    })
            })
            .collect())
    }

    /// Logged optimization results together with the known labels
    pub fn optimization_snapshot(
        &self,
    ) -> PipelineResult<(Vec<OptimizationResult>, HashMap<String, GroundTruth>)> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok((
            state.entries.iter().map(|e| e.optimization.clone()).collect(),
            state.labels.clone(),
        ))
    }
}

/// Area under the ROC curve from the rank-sum statistic, ties averaged.
///
/// `None` unless both classes are present.
fn rank_auc(scores: &[(f64, bool)]) -> Option<f64> {
    let positives = scores.iter().filter(|(_, p)| *p).count();
    let negatives = scores.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<(f64, bool)> = scores.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        positive_rank_sum += avg_rank * sorted[i..=j].iter().filter(|(_, p)| *p).count() as f64;
        i = j + 1;
    }

    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

#[cfg(test)]
impl PredictionLog {
    /// Poison the lock by panicking while holding it
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.state.write();
            panic!("poisoning prediction log");
        }));
    }
}
