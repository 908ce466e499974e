//! Privacy accounting with the Gaussian mechanism
//!
//! Tracks cumulative privacy cost per participant against a fixed budget and
//! provides the clip-then-noise transform applied to gradient-like values.
//! The charge path is a strict check-then-commit critical section: it runs
//! under the participant registry's write lock, so two concurrent charges
//! for the same participant can never both pass the check.

use rand::Rng;
use std::sync::{Arc, RwLock};

use crate::config::{ChargePolicy, PrivacyConfig};
use crate::error::{FedError, Result};
use crate::participant::{ParticipantId, ParticipantRegistry};
use crate::tensor::{global_l2_norm, ModelWeights, Tensor};

/// Privacy accountant for the Gaussian mechanism
#[derive(Debug)]
pub struct PrivacyAccountant {
    config: PrivacyConfig,
    /// sigma = sensitivity * noise_multiplier
    noise_multiplier: f64,
    registry: Arc<RwLock<ParticipantRegistry>>,
}

impl PrivacyAccountant {
    /// Creates an accountant over the shared participant registry
    pub fn new(
        config: PrivacyConfig,
        registry: Arc<RwLock<ParticipantRegistry>>,
    ) -> Result<Self> {
        config.validate()?;
        // Gaussian mechanism: sigma = sensitivity * sqrt(2 ln(1.25/delta)) / epsilon
        let noise_multiplier =
            (2.0 * (1.25 / config.delta).ln()).sqrt() / config.epsilon;
        Ok(Self {
            config,
            noise_multiplier,
            registry,
        })
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    pub fn noise_multiplier(&self) -> f64 {
        self.noise_multiplier
    }

    /// Number of budget steps one round of local training costs
    pub fn steps_for_round(&self, local_epochs: usize) -> usize {
        match self.config.charge_policy {
            ChargePolicy::PerLocalEpoch => local_epochs,
            ChargePolicy::PerRound => 1,
        }
    }

    /// Remaining budget for a participant, clamped to zero from below
    pub fn remaining_budget(&self, id: &str) -> Result<f64> {
        let registry = self.registry.read()?;
        Ok(registry.get(id)?.remaining_budget())
    }

    /// Charges `num_local_steps * epsilon` against the participant's budget.
    ///
    /// Fails with `BudgetExceeded` without mutating anything; on success
    /// commits the spend and returns the new remaining budget. Atomic per
    /// participant: check and commit happen under one write guard.
    pub fn charge(&self, id: &ParticipantId, num_local_steps: usize) -> Result<f64> {
        let cost = num_local_steps as f64 * self.config.epsilon;

        let mut registry = self.registry.write()?;
        let participant = registry.get_mut(id)?;

        if participant.budget_spent + cost > participant.budget_total {
            return Err(FedError::BudgetExceeded {
                participant: id.clone(),
                spent: participant.budget_spent,
                cost,
                total: participant.budget_total,
            });
        }

        participant.budget_spent += cost;
        let remaining = participant.remaining_budget();
        tracing::debug!(participant = %id, cost, remaining, "privacy budget charged");
        Ok(remaining)
    }

    /// Clips a gradient-like tensor to `clip_norm` and adds independent
    /// zero-mean Gaussian noise with sigma = `sensitivity * noise_multiplier`
    /// to every element. Stateless apart from the multiplier.
    pub fn clip_and_privatize(
        &self,
        value: &Tensor,
        clip_norm: f64,
        sensitivity: f64,
    ) -> Tensor {
        let mut result = value.clone();

        let norm = result.l2_norm();
        if norm > clip_norm && norm > 0.0 {
            result.scale(clip_norm / norm);
        }

        let sigma = sensitivity * self.noise_multiplier;
        if sigma > 0.0 {
            let mut rng = rand::thread_rng();
            for x in result.data_mut() {
                *x += gaussian(&mut rng, sigma);
            }
        }
        result
    }

    /// Weight-map variant of `clip_and_privatize`: clipping uses the global
    /// L2 norm across all layers so the bound holds for the whole update.
    /// `LocalTrainer` implementations apply this to their weight update
    /// before sealing it.
    pub fn privatize_weights(
        &self,
        weights: &ModelWeights,
        clip_norm: f64,
        sensitivity: f64,
    ) -> ModelWeights {
        let mut result = weights.clone();

        let norm = global_l2_norm(&result);
        if norm > clip_norm && norm > 0.0 {
            let factor = clip_norm / norm;
            for tensor in result.values_mut() {
                tensor.scale(factor);
            }
        }

        let sigma = sensitivity * self.noise_multiplier;
        if sigma > 0.0 {
            let mut rng = rand::thread_rng();
            for tensor in result.values_mut() {
                for x in tensor.data_mut() {
                    *x += gaussian(&mut rng, sigma);
                }
            }
        }
        result
    }
}

/// Aggregate view of budget usage across the network
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PrivacyReport {
    pub total_participants: usize,
    pub participants_with_budget: usize,
    pub mean_budget_spent: f64,
    pub epsilon: f64,
    pub delta: f64,
}

impl PrivacyAccountant {
    /// Budget usage report over all registered participants
    pub fn report(&self) -> Result<PrivacyReport> {
        let registry = self.registry.read()?;
        let participants = registry.list();
        let total = participants.len();
        let with_budget = participants.iter().filter(|p| p.is_eligible()).count();
        let mean_spent = if total > 0 {
            participants.iter().map(|p| p.budget_spent).sum::<f64>() / total as f64
        } else {
            0.0
        };
        Ok(PrivacyReport {
            total_participants: total,
            participants_with_budget: with_budget,
            mean_budget_spent: mean_spent,
            epsilon: self.config.epsilon,
            delta: self.config.delta,
        })
    }
}

/// Zero-mean Gaussian sample via Box-Muller
fn gaussian<R: Rng>(rng: &mut R, sigma: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z * sigma
}
