//! # medfed — Federated Training Coordinator
//!
//! Coordinates privacy-preserving federated learning rounds across
//! healthcare institutions. Participants train locally and submit sealed
//! weight updates; the coordinator verifies, aggregates and versions the
//! global model without raw training data ever leaving an institution.
//!
//! ## Responsibilities
//! - Participant registry with per-institution privacy budgets
//! - Round lifecycle: select → dispatch → collect → aggregate → evaluate
//! - Contribution-size-weighted secure aggregation (ChaCha20-Poly1305
//!   envelopes, constant-time integrity tags)
//! - Differential-privacy accounting (Gaussian mechanism)
//! - Versioned global models with append-only round history
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medfed::prelude::*;
//!
//! struct EchoTrainer {
//!     key: EnvelopeKey,
//! }
//!
//! impl LocalTrainer for EchoTrainer {
//!     fn train(
//!         &self,
//!         participant: &Participant,
//!         model_id: &str,
//!         weights_snapshot: &ModelWeights,
//!         _local_epochs: usize,
//!     ) -> medfed::Result<LocalUpdate> {
//!         Ok(LocalUpdate {
//!             participant_id: participant.id.clone(),
//!             model_id: model_id.to_string(),
//!             sealed: self.key.seal(weights_snapshot)?,
//!             contribution_size: participant.contribution_size,
//!             submitted_at: 0,
//!         })
//!     }
//! }
//!
//! struct EchoEvaluator;
//!
//! impl LocalEvaluator for EchoEvaluator {
//!     fn evaluate(
//!         &self,
//!         _weights_snapshot: &ModelWeights,
//!         _participant_id: &str,
//!     ) -> medfed::Result<PerformanceSnapshot> {
//!         let mut metrics = PerformanceSnapshot::new();
//!         metrics.insert("accuracy".into(), 0.9);
//!         Ok(metrics)
//!     }
//! }
//!
//! let key = EnvelopeKey::generate();
//! let coordinator = RoundCoordinator::with_envelope_key(
//!     TrainingConfig::default(),
//!     PrivacyConfig::default(),
//!     Arc::new(EchoTrainer { key: key.clone() }),
//!     Arc::new(EchoEvaluator),
//!     key,
//! )?;
//!
//! coordinator.register_participant(ParticipantDescriptor {
//!     id: "hospital-a".into(),
//!     kind: InstitutionKind::Hospital,
//!     contribution_size: 1200,
//! })?;
//! coordinator.initialize_model(ModelKind::DiseasePrediction, "readmission".into())?;
//!
//! let report = coordinator.train("readmission")?;
//! println!("converged: {} after {} rounds", report.converged, report.rounds_run);
//! # Ok::<(), medfed::FedError>(())
//! ```

pub mod error;
pub use error::{FedError, Result};

pub mod config;
pub use config::{ChargePolicy, PrivacyConfig, TrainingConfig};

pub mod tensor;
pub use tensor::{check_shapes, global_l2_norm, ModelWeights, Tensor};

pub mod participant;
pub use participant::{
    InstitutionKind, Participant, ParticipantDescriptor, ParticipantId, ParticipantRegistry,
};

pub mod envelope;
pub use envelope::{EnvelopeKey, SealedPayload};

pub mod privacy;
pub use privacy::{PrivacyAccountant, PrivacyReport};

pub mod round;
pub use round::{
    LocalUpdate, PerformanceSnapshot, RoundOutcome, RoundPhase, TrainingReport, TrainingRound,
};

pub mod aggregate;
pub use aggregate::{Aggregate, SecureAggregator};

pub mod collaborator;
pub use collaborator::{LocalEvaluator, LocalTrainer};

pub mod model;
pub use model::{GlobalModel, ModelId, ModelKind, ModelRegistry, ModelStatus};

pub mod coordinator;
pub use coordinator::{RoundCoordinator, StopHandle};

/// Prelude module with common re-exports
pub mod prelude {
    pub use crate::aggregate::{Aggregate, SecureAggregator};
    pub use crate::collaborator::{LocalEvaluator, LocalTrainer};
    pub use crate::config::{ChargePolicy, PrivacyConfig, TrainingConfig};
    pub use crate::coordinator::{RoundCoordinator, StopHandle};
    pub use crate::envelope::{EnvelopeKey, SealedPayload};
    pub use crate::error::{FedError, Result};
    pub use crate::model::{GlobalModel, ModelKind, ModelRegistry, ModelStatus};
    pub use crate::participant::{
        InstitutionKind, Participant, ParticipantDescriptor, ParticipantRegistry,
    };
    pub use crate::privacy::{PrivacyAccountant, PrivacyReport};
    pub use crate::round::{
        LocalUpdate, PerformanceSnapshot, RoundOutcome, TrainingReport, TrainingRound,
    };
    pub use crate::tensor::{ModelWeights, Tensor};
}
