//! Configuration for privacy accounting and training rounds

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FedError, Result};

/// How the privacy budget is charged for one round of local training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePolicy {
    /// One epsilon per local epoch (conservative)
    PerLocalEpoch,
    /// Flat epsilon per round regardless of local epochs
    PerRound,
}

/// Differential privacy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Privacy loss per query
    pub epsilon: f64,
    /// Failure probability (must be < 1)
    pub delta: f64,
    /// Default budget total assigned to new participants
    pub default_budget: f64,
    /// Charge policy for local training
    pub charge_policy: ChargePolicy,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            epsilon: 1.0,
            delta: 1e-5,
            default_budget: 10.0,
            charge_policy: ChargePolicy::PerLocalEpoch,
        }
    }
}

impl PrivacyConfig {
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_charge_policy(mut self, policy: ChargePolicy) -> Self {
        self.charge_policy = policy;
        self
    }

    /// Validates parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.epsilon <= 0.0 {
            return Err(FedError::InvalidConfiguration(
                "epsilon must be positive".into(),
            ));
        }
        if self.delta <= 0.0 || self.delta >= 1.0 {
            return Err(FedError::InvalidConfiguration(
                "delta must be in (0, 1)".into(),
            ));
        }
        if self.default_budget <= 0.0 {
            return Err(FedError::InvalidConfiguration(
                "default_budget must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Training driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of rounds before the driver stops
    pub max_rounds: usize,
    /// Participants selected per round (also the dispatch concurrency bound)
    pub participants_per_round: usize,
    /// Local epochs each participant trains per round
    pub local_epochs: usize,
    /// Driver stops when |metric - previous| < threshold
    pub convergence_threshold: f64,
    /// Metric key used for the convergence check
    pub convergence_metric: String,
    /// Per-participant dispatch timeout
    #[serde(with = "duration_millis")]
    pub participant_timeout: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            participants_per_round: 5,
            local_epochs: 5,
            convergence_threshold: 0.001,
            convergence_metric: "accuracy".into(),
            participant_timeout: Duration::from_secs(30),
        }
    }
}

impl TrainingConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_participants_per_round(mut self, n: usize) -> Self {
        self.participants_per_round = n;
        self
    }

    pub fn with_local_epochs(mut self, epochs: usize) -> Self {
        self.local_epochs = epochs;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_participant_timeout(mut self, timeout: Duration) -> Self {
        self.participant_timeout = timeout;
        self
    }
}

/// Serde helper: Duration as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
