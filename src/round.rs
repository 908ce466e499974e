//! Round records and outcomes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::envelope::SealedPayload;
use crate::participant::ParticipantId;

/// Metric name to value snapshot
pub type PerformanceSnapshot = BTreeMap<String, f64>;

/// Local model update submitted by one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUpdate {
    pub participant_id: ParticipantId,
    /// Model the update targets; must match the round's model
    pub model_id: String,
    /// Confidentiality-wrapped weights plus integrity tag
    pub sealed: SealedPayload,
    /// Contribution size copied from the participant at submission time
    pub contribution_size: u64,
    /// Submission timestamp (nanos since epoch)
    pub submitted_at: u64,
}

/// Terminal outcome of one training round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Aggregate committed as a new model version
    Completed,
    /// Zero valid updates survived verification and shape filtering
    NoValidUpdates,
    /// Aggregation failed; model untouched
    AggregationFailed,
}

/// Phase of the round state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    Selecting,
    Dispatching,
    Collecting,
    Aggregating,
    Evaluating,
    Done,
}

/// Record of one training round, retained read-only in the round history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRound {
    pub round_id: String,
    pub model_id: String,
    /// Model version at round start
    pub target_version: u64,
    /// Participants invited in `selecting`
    pub invited: Vec<ParticipantId>,
    /// Participants whose update was accepted into the aggregate
    pub accepted: Vec<ParticipantId>,
    pub performance: PerformanceSnapshot,
    pub outcome: RoundOutcome,
    pub timestamp: u64,
}

/// Summary returned by the multi-round driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_id: String,
    pub rounds_run: usize,
    pub completed_rounds: usize,
    pub converged: bool,
    pub stopped: bool,
    pub final_version: u64,
    pub final_performance: PerformanceSnapshot,
}

/// Timestamp in nanoseconds since epoch
pub(crate) fn now_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
