//! Type definitions for the risk scoring pipeline

pub mod message;
pub mod score;
pub mod transaction;

pub use message::{OutcomeStatus, ScoringOutcome, ScoringRequest};
pub use score::{BatchSummary, Explanation, ScoreResult};
pub use transaction::{TransactionBatch, TransactionRecord, REQUIRED_COLUMNS};
