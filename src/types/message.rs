//! Messages exchanged with the scoring service over NATS

use crate::pipeline::{PipelineFailure, Stage, StoredOutput};
use crate::storage::ArtifactHandle;
use crate::types::score::BatchSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to score one stored batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRequest {
    /// Unique request identifier, echoed in the outcome
    pub request_id: String,

    /// Handle of the uploaded batch in the artifact store
    pub input_handle: ArtifactHandle,

    /// When the request was submitted
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl ScoringRequest {
    pub fn new(input_handle: ArtifactHandle) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            input_handle,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Terminal result of one scoring request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub request_id: String,

    pub status: OutcomeStatus,

    /// Output artifact; present only on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_handle: Option<ArtifactHandle>,

    /// Stable error kind such as `schema_error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Stage that could not be completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    #[serde(default)]
    pub summary: BatchSummary,

    pub processing_ms: f64,

    pub completed_at: DateTime<Utc>,
}

impl ScoringOutcome {
    pub fn completed(request_id: &str, output: &StoredOutput) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: OutcomeStatus::Completed,
            output_handle: Some(output.handle.clone()),
            error_kind: None,
            error_message: None,
            failed_stage: None,
            summary: output.summary,
            processing_ms: output.elapsed.as_secs_f64() * 1000.0,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(request_id: &str, failure: &PipelineFailure, processing_ms: f64) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: OutcomeStatus::Failed,
            output_handle: None,
            error_kind: Some(failure.error.kind().to_string()),
            error_message: Some(failure.error.to_string()),
            failed_stage: Some(failure.stage),
            summary: BatchSummary::default(),
            processing_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::time::Duration;

    #[test]
    fn test_request_round_trip() {
        let request = ScoringRequest::new(ArtifactHandle::new("incoming/abc.csv"));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"input_handle\":\"incoming/abc.csv\""));

        let parsed: ScoringRequest =
            serde_json::from_str(r#"{"request_id": "r-1", "input_handle": "incoming/x.csv"}"#).unwrap();
        assert_eq!(parsed.request_id, "r-1");
        assert_eq!(parsed.input_handle.as_str(), "incoming/x.csv");
    }

    #[test]
    fn test_failed_outcome_fields() {
        let failure = PipelineFailure {
            stage: Stage::Parsed,
            error: PipelineError::Schema("missing columns: [\"mcc\"]".to_string()),
        };
        let outcome = ScoringOutcome::failed("r-2", &failure, 1.5);
        assert!(!outcome.is_success());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_kind"], "schema_error");
        assert_eq!(json["failed_stage"], "parsed");
        assert!(json.get("output_handle").is_none());
    }

    #[test]
    fn test_completed_outcome() {
        let stored = StoredOutput {
            handle: ArtifactHandle::new("flagged/out.csv"),
            summary: BatchSummary {
                rows_in: 10,
                rows_scored: 10,
                rows_dropped: 0,
                fraud_flagged: 2,
                anomaly_flagged: 1,
            },
            elapsed: Duration::from_millis(12),
        };
        let outcome = ScoringOutcome::completed("r-3", &stored);
        assert!(outcome.is_success());
        assert_eq!(outcome.summary.fraud_flagged, 2);
        assert!((outcome.processing_ms - 12.0).abs() < 1e-9);
    }
}
