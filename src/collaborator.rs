//! Collaborator seams
//!
//! Local training and evaluation happen at the participants and are injected
//! behind these traits; the coordinator never bakes in a training backend.
//! Implementations run on dispatch worker threads, so they must be
//! `Send + Sync`.

use crate::error::Result;
use crate::participant::Participant;
use crate::round::{LocalUpdate, PerformanceSnapshot};
use crate::tensor::ModelWeights;

/// Local training collaborator.
///
/// Given the current global weights and a local epoch count, produces a
/// sealed `LocalUpdate` for one participant. The snapshot is borrowed
/// immutably; implementations clone what they need. A failure here is
/// per-participant and recoverable: the round proceeds without the update.
pub trait LocalTrainer: Send + Sync {
    fn train(
        &self,
        participant: &Participant,
        model_id: &str,
        weights_snapshot: &ModelWeights,
        local_epochs: usize,
    ) -> Result<LocalUpdate>;
}

/// Local evaluation collaborator.
///
/// Evaluates an aggregate on one participant's local test data. Rate-like
/// metrics are expected in `[0, 1]`.
pub trait LocalEvaluator: Send + Sync {
    fn evaluate(
        &self,
        weights_snapshot: &ModelWeights,
        participant_id: &str,
    ) -> Result<PerformanceSnapshot>;
}
