//! NATS producer for scoring outcomes

use crate::types::message::ScoringOutcome;
use anyhow::{Context, Result};
use async_nats::Client;
use tracing::debug;

/// Publishes the terminal outcome of each scoring request
#[derive(Clone)]
pub struct OutcomeProducer {
    client: Client,
    subject: String,
}

impl OutcomeProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, outcome: &ScoringOutcome) -> Result<()> {
        let payload = encode_outcome(outcome)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", self.subject))?;

        debug!(
            request_id = %outcome.request_id,
            status = ?outcome.status,
            "Published scoring outcome"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Serialize an outcome as the JSON message body
pub fn encode_outcome(outcome: &ScoringOutcome) -> Result<Vec<u8>> {
    serde_json::to_vec(outcome).context("Failed to encode scoring outcome")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::{PipelineFailure, Stage};

    #[test]
    fn test_encode_failed_outcome() {
        let failure = PipelineFailure {
            stage: Stage::Received,
            error: PipelineError::Storage("artifact not found: incoming/a.csv".to_string()),
        };
        let outcome = ScoringOutcome::failed("r-4", &failure, 0.4);

        let body: serde_json::Value = serde_json::from_slice(&encode_outcome(&outcome).unwrap()).unwrap();
        assert_eq!(body["request_id"], "r-4");
        assert_eq!(body["failed_stage"], "received");
        assert_eq!(body["summary"]["rows_scored"], 0);
    }
}
