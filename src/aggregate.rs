//! Secure aggregation of local updates
//!
//! Combines verified updates into one aggregate weighted by contribution
//! size. Pure function of its inputs: anomalies (bad tags, shape mismatches)
//! are dropped and reported on the log side channel only.

use crate::envelope::EnvelopeKey;
use crate::error::{FedError, Result};
use crate::participant::ParticipantId;
use crate::round::LocalUpdate;
use crate::tensor::{check_shapes, ModelWeights, Tensor};

/// Result of one aggregation: the combined weights plus the participants
/// whose update actually made it into the combination
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub weights: ModelWeights,
    pub contributors: Vec<ParticipantId>,
}

/// Aggregation authority: holds the envelope key and the weighted-mean
/// combination rule
#[derive(Debug)]
pub struct SecureAggregator {
    key: EnvelopeKey,
}

impl SecureAggregator {
    pub fn new(key: EnvelopeKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &EnvelopeKey {
        &self.key
    }

    /// Aggregates updates into new weights for the given template.
    ///
    /// Discards updates that fail integrity verification before opening
    /// anything; opens the survivors and drops those whose per-layer shapes
    /// do not match the template. The remaining updates are combined per
    /// layer as the contribution-size-weighted mean
    /// `sum(w_i * u_i) / sum(w_i)`. Fails with `NoValidUpdates` if nothing
    /// survives either filter.
    pub fn aggregate(
        &self,
        updates: &[LocalUpdate],
        template: &ModelWeights,
    ) -> Result<Aggregate> {
        // Cheap integrity filter first; never open an unverified payload
        let verified: Vec<&LocalUpdate> = updates
            .iter()
            .filter(|u| {
                let ok = u.sealed.verify();
                if !ok {
                    tracing::warn!(
                        participant = %u.participant_id,
                        "dropping update with invalid integrity tag"
                    );
                }
                ok
            })
            .collect();

        if verified.is_empty() {
            return Err(FedError::NoValidUpdates);
        }

        let mut opened: Vec<(ModelWeights, f64)> = Vec::with_capacity(verified.len());
        let mut contributors: Vec<ParticipantId> = Vec::with_capacity(verified.len());
        for update in verified {
            let weights = match self.key.open(&update.sealed) {
                Ok(w) => w,
                Err(e) => {
                    tracing::warn!(
                        participant = %update.participant_id,
                        error = %e,
                        "dropping update that failed to open"
                    );
                    continue;
                }
            };
            if let Err(e) = check_shapes(&weights, template) {
                tracing::warn!(
                    participant = %update.participant_id,
                    error = %e,
                    "dropping update with mismatched shapes"
                );
                continue;
            }
            opened.push((weights, update.contribution_size as f64));
            contributors.push(update.participant_id.clone());
        }

        if opened.is_empty() {
            return Err(FedError::NoValidUpdates);
        }

        let total_weight: f64 = opened.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return Err(FedError::AggregationFailed(
                "total contribution weight is zero".into(),
            ));
        }

        let mut aggregated: ModelWeights = template
            .iter()
            .map(|(name, tensor)| (name.clone(), Tensor::zeros(tensor.shape())))
            .collect();

        for (weights, contribution) in &opened {
            let factor = contribution / total_weight;
            for (name, tensor) in weights {
                // Shapes already validated against the template
                aggregated
                    .get_mut(name)
                    .ok_or_else(|| FedError::AggregationFailed(format!("missing layer {name}")))?
                    .add_scaled(tensor, factor)?;
            }
        }

        Ok(Aggregate {
            weights: aggregated,
            contributors,
        })
    }
}
