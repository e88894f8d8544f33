//! NATS message producer for risk assessments

use crate::error::{FailureStage, PipelineError};
use crate::pipeline::RiskAssessment;
use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use tracing::debug;

/// Error payload for an assessment that could not be completed
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentFailure {
    pub transaction_id: Option<String>,
    pub stage: FailureStage,
    pub message: String,
}

impl AssessmentFailure {
    pub fn from_error(transaction_id: Option<String>, error: &PipelineError) -> Self {
        Self {
            transaction_id,
            stage: error.stage(),
            message: error.to_string(),
        }
    }

    /// A payload that could not be decoded into a transaction
    pub fn malformed(transaction_id: Option<String>, error: &serde_json::Error) -> Self {
        Self {
            transaction_id,
            stage: FailureStage::Validation,
            message: format!("malformed transaction: {}", error),
        }
    }
}

/// Publishes assessments and failures, answering requests on their reply subject
#[derive(Clone)]
pub struct AssessmentProducer {
    client: Client,
    assessment_subject: String,
    error_subject: String,
}

impl AssessmentProducer {
    pub fn new(client: Client, assessment_subject: &str, error_subject: &str) -> Self {
        Self {
            client,
            assessment_subject: assessment_subject.to_string(),
            error_subject: error_subject.to_string(),
        }
    }

    /// Publish an assessment to `reply` if present, otherwise to the assessment subject
    pub async fn publish_assessment(
        &self,
        assessment: &RiskAssessment,
        reply: Option<Subject>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(assessment)?;
        let subject = reply.unwrap_or_else(|| Subject::from(self.assessment_subject.as_str()));
        self.client.publish(subject.clone(), payload.into()).await?;

        debug!(
            subject = %subject,
            assessment_id = %assessment.assessment_id,
            transaction_id = %assessment.transaction_id(),
            risk_score = assessment.prediction.risk_score,
            "Published risk assessment"
        );

        Ok(())
    }

    /// Publish a failure to `reply` if present, otherwise to the error subject
    pub async fn publish_failure(
        &self,
        failure: &AssessmentFailure,
        reply: Option<Subject>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(failure)?;
        let subject = reply.unwrap_or_else(|| Subject::from(self.error_subject.as_str()));
        self.client.publish(subject.clone(), payload.into()).await?;

        debug!(
            subject = %subject,
            stage = failure.stage.as_str(),
            "Published assessment failure"
        );

        Ok(())
    }

    pub fn assessment_subject(&self) -> &str {
        &self.assessment_subject
    }

    pub fn error_subject(&self) -> &str {
        &self.error_subject
    }
}
