//! Global model records and registry
//!
//! The registry exclusively owns `GlobalModel` records and is the only
//! writer of version numbers. Tensor shapes for a model never change across
//! versions; `commit_new_version` is the single point of serialization for
//! a model id.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{FedError, Result};
use crate::participant::ParticipantId;
use crate::round::{now_nanos, PerformanceSnapshot};
use crate::tensor::{check_shapes, ModelWeights, Tensor};

/// Model id
pub type ModelId = String;

/// Weight-shape template selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    DiseasePrediction,
    RiskAssessment,
    Generic,
}

impl ModelKind {
    /// Deterministic zero-initialized weight-shape template for this kind
    pub fn template(&self) -> ModelWeights {
        let shapes: &[(&str, &[usize])] = match self {
            ModelKind::DiseasePrediction => &[
                ("layer1", &[100, 50]),
                ("layer2", &[50, 10]),
                ("output", &[10, 1]),
            ],
            ModelKind::RiskAssessment => {
                &[("features", &[200, 100]), ("classifier", &[100, 5])]
            }
            ModelKind::Generic => &[("weights", &[100, 10])],
        };
        shapes
            .iter()
            .map(|(name, shape)| (name.to_string(), Tensor::zeros(shape)))
            .collect()
    }
}

/// Versioned global model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalModel {
    pub model_id: ModelId,
    pub kind: ModelKind,
    pub weights: ModelWeights,
    /// Starts at 1, incremented by exactly 1 per committed round,
    /// never reused
    pub version: u64,
    /// Every participant that has ever contributed to a committed version
    pub contributors: BTreeSet<ParticipantId>,
    pub performance: PerformanceSnapshot,
    pub created_at: u64,
    pub last_updated: u64,
}

/// Read-only status snapshot of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_id: ModelId,
    pub kind: ModelKind,
    pub version: u64,
    pub participant_count: usize,
    pub performance: PerformanceSnapshot,
    pub last_updated: u64,
}

impl GlobalModel {
    fn status(&self) -> ModelStatus {
        ModelStatus {
            model_id: self.model_id.clone(),
            kind: self.kind,
            version: self.version,
            participant_count: self.contributors.len(),
            performance: self.performance.clone(),
            last_updated: self.last_updated,
        }
    }
}

/// Model store; the only writer of version numbers
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<ModelId, GlobalModel>,
    /// Creation order for listings
    order: Vec<ModelId>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a model with the deterministic template for `kind`
    pub fn create(&mut self, kind: ModelKind, model_id: ModelId) -> Result<GlobalModel> {
        if self.models.contains_key(&model_id) {
            return Err(FedError::DuplicateModel(model_id));
        }

        let now = now_nanos();
        let model = GlobalModel {
            model_id: model_id.clone(),
            kind,
            weights: kind.template(),
            version: 1,
            contributors: BTreeSet::new(),
            performance: PerformanceSnapshot::new(),
            created_at: now,
            last_updated: now,
        };

        self.order.push(model_id.clone());
        self.models.insert(model_id, model.clone());
        tracing::info!(model = %model.model_id, kind = ?kind, "global model created");
        Ok(model)
    }

    pub fn get(&self, model_id: &str) -> Result<&GlobalModel> {
        self.models
            .get(model_id)
            .ok_or_else(|| FedError::ModelNotFound(model_id.into()))
    }

    pub fn status(&self, model_id: &str) -> Result<ModelStatus> {
        Ok(self.get(model_id)?.status())
    }

    /// Status of all models in creation order
    pub fn list_status(&self) -> Vec<ModelStatus> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id))
            .map(GlobalModel::status)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.models.len()
    }

    /// Atomically replaces weights, bumps the version by exactly 1, unions
    /// the contributing participants and refreshes the performance snapshot.
    /// Rejects weights whose shapes differ from the model's template.
    pub fn commit_new_version(
        &mut self,
        model_id: &str,
        new_weights: ModelWeights,
        contributing_participants: &[ParticipantId],
        performance: PerformanceSnapshot,
    ) -> Result<GlobalModel> {
        let model = self
            .models
            .get_mut(model_id)
            .ok_or_else(|| FedError::ModelNotFound(model_id.into()))?;

        check_shapes(&new_weights, &model.weights)?;

        model.weights = new_weights;
        model.version += 1;
        model
            .contributors
            .extend(contributing_participants.iter().cloned());
        model.performance = performance;
        model.last_updated = now_nanos();

        tracing::info!(
            model = %model.model_id,
            version = model.version,
            contributors = contributing_participants.len(),
            "committed new model version"
        );
        Ok(model.clone())
    }
}
