//! Participant records and registry
//!
//! Each participant is an independent data-holding institution. The registry
//! is the single writer of participant records; the privacy accountant is the
//! only component allowed to advance `budget_spent`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{FedError, Result};

/// Unique participant ID
pub type ParticipantId = String;

/// Institution class of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstitutionKind {
    Hospital,
    Clinic,
    ResearchCenter,
}

/// Static attributes supplied at registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantDescriptor {
    pub id: ParticipantId,
    pub kind: InstitutionKind,
    /// Proxy for local data volume; weights the participant's influence
    /// on the aggregate
    pub contribution_size: u64,
}

/// Registered participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub kind: InstitutionKind,
    pub contribution_size: u64,
    /// Total privacy budget; fixed at registration
    pub budget_total: f64,
    /// Cumulative privacy cost; monotonically non-decreasing,
    /// never exceeds `budget_total`
    pub budget_spent: f64,
}

impl Participant {
    /// Remaining privacy budget, clamped to zero from below
    pub fn remaining_budget(&self) -> f64 {
        (self.budget_total - self.budget_spent).max(0.0)
    }

    /// A participant with no remaining budget is permanently ineligible
    pub fn is_eligible(&self) -> bool {
        self.remaining_budget() > 0.0
    }
}

/// Participant store; insertion-ordered listing
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<ParticipantId, Participant>,
    /// Registration order for `list`
    order: Vec<ParticipantId>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a participant with the given default budget
    pub fn register(
        &mut self,
        descriptor: ParticipantDescriptor,
        default_budget: f64,
    ) -> Result<Participant> {
        if descriptor.contribution_size == 0 {
            return Err(FedError::InvalidConfiguration(format!(
                "participant {} has zero contribution size",
                descriptor.id
            )));
        }
        if self.participants.contains_key(&descriptor.id) {
            return Err(FedError::DuplicateParticipant(descriptor.id));
        }

        let participant = Participant {
            id: descriptor.id.clone(),
            kind: descriptor.kind,
            contribution_size: descriptor.contribution_size,
            budget_total: default_budget,
            budget_spent: 0.0,
        };

        self.order.push(descriptor.id.clone());
        self.participants
            .insert(descriptor.id, participant.clone());
        Ok(participant)
    }

    pub fn get(&self, id: &str) -> Result<&Participant> {
        self.participants
            .get(id)
            .ok_or_else(|| FedError::ParticipantNotFound(id.into()))
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Participant> {
        self.participants
            .get_mut(id)
            .ok_or_else(|| FedError::ParticipantNotFound(id.into()))
    }

    /// All participants in registration order
    pub fn list(&self) -> Vec<Participant> {
        self.order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }
}
