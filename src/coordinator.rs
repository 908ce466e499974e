//! Round coordinator
//!
//! Drives one training round end-to-end (select → dispatch → collect →
//! aggregate → evaluate → commit) and the multi-round driver that repeats
//! rounds until convergence or the round budget runs out. Also the facade
//! the outer API layer calls for registration and status operations.
//!
//! Dispatch issues one worker thread per selected participant and blocks on
//! a collection barrier: aggregation never starts before every dispatched
//! unit has completed or timed out, because the weighting denominator needs
//! the full accepted set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::aggregate::SecureAggregator;
use crate::collaborator::{LocalEvaluator, LocalTrainer};
use crate::config::{PrivacyConfig, TrainingConfig};
use crate::envelope::EnvelopeKey;
use crate::error::{FedError, Result};
use crate::model::{GlobalModel, ModelKind, ModelRegistry, ModelStatus};
use crate::participant::{Participant, ParticipantDescriptor, ParticipantRegistry};
use crate::privacy::{PrivacyAccountant, PrivacyReport};
use crate::round::{
    now_nanos, LocalUpdate, PerformanceSnapshot, RoundOutcome, RoundPhase, TrainingReport,
    TrainingRound,
};
use crate::tensor::ModelWeights;

/// Cancellation handle for the multi-round driver.
///
/// A stop request is honored between rounds only; a round in progress always
/// runs to a terminal outcome first.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Federated training coordinator
pub struct RoundCoordinator {
    config: TrainingConfig,
    participants: Arc<RwLock<ParticipantRegistry>>,
    models: Arc<RwLock<ModelRegistry>>,
    accountant: PrivacyAccountant,
    aggregator: SecureAggregator,
    trainer: Arc<dyn LocalTrainer>,
    evaluator: Arc<dyn LocalEvaluator>,
    history: RwLock<Vec<TrainingRound>>,
    round_counter: AtomicU64,
    stop: Arc<AtomicBool>,
}

impl RoundCoordinator {
    /// Creates a coordinator with a freshly generated envelope key
    pub fn new(
        config: TrainingConfig,
        privacy: PrivacyConfig,
        trainer: Arc<dyn LocalTrainer>,
        evaluator: Arc<dyn LocalEvaluator>,
    ) -> Result<Self> {
        Self::with_envelope_key(config, privacy, trainer, evaluator, EnvelopeKey::generate())
    }

    /// Creates a coordinator around an existing aggregation-authority key
    pub fn with_envelope_key(
        config: TrainingConfig,
        privacy: PrivacyConfig,
        trainer: Arc<dyn LocalTrainer>,
        evaluator: Arc<dyn LocalEvaluator>,
        key: EnvelopeKey,
    ) -> Result<Self> {
        if config.participants_per_round == 0 {
            return Err(FedError::InvalidConfiguration(
                "participants_per_round must be positive".into(),
            ));
        }
        let participants = Arc::new(RwLock::new(ParticipantRegistry::new()));
        let accountant = PrivacyAccountant::new(privacy, Arc::clone(&participants))?;
        Ok(Self {
            config,
            participants,
            models: Arc::new(RwLock::new(ModelRegistry::new())),
            accountant,
            aggregator: SecureAggregator::new(key),
            trainer,
            evaluator,
            history: RwLock::new(Vec::new()),
            round_counter: AtomicU64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Envelope key, for distribution to participant-side trainers
    pub fn envelope_key(&self) -> EnvelopeKey {
        self.aggregator.key().clone()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    // ── Facade operations ──────────────────────────────────────────────

    pub fn register_participant(
        &self,
        descriptor: ParticipantDescriptor,
    ) -> Result<Participant> {
        let default_budget = self.accountant.config().default_budget;
        let mut registry = self.participants.write()?;
        let participant = registry.register(descriptor, default_budget)?;
        tracing::info!(participant = %participant.id, "participant registered");
        Ok(participant)
    }

    pub fn initialize_model(&self, kind: ModelKind, model_id: String) -> Result<GlobalModel> {
        self.models.write()?.create(kind, model_id)
    }

    pub fn get_model_status(&self, model_id: &str) -> Result<ModelStatus> {
        self.models.read()?.status(model_id)
    }

    pub fn list_participants(&self) -> Result<Vec<Participant>> {
        Ok(self.participants.read()?.list())
    }

    pub fn list_models(&self) -> Result<Vec<ModelStatus>> {
        Ok(self.models.read()?.list_status())
    }

    /// Append-only log of finished rounds
    pub fn round_history(&self) -> Result<Vec<TrainingRound>> {
        Ok(self.history.read()?.clone())
    }

    pub fn privacy_report(&self) -> Result<PrivacyReport> {
        self.accountant.report()
    }

    // ── One round ──────────────────────────────────────────────────────

    /// Runs one training round against `model_id`.
    ///
    /// Per-participant failures (dispatch errors, timeouts, bad tags,
    /// exhausted budgets) are absorbed; the round proceeds with the valid
    /// remainder. A round-level failure is returned as a `TrainingRound`
    /// with a failed outcome, never as an error, and never mutates the
    /// committed model.
    pub fn start_training_round(&self, model_id: &str) -> Result<TrainingRound> {
        let round_id = format!(
            "round-{:06}",
            self.round_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        let mut phase = RoundPhase::Selecting;
        tracing::info!(round = %round_id, model = %model_id, phase = ?phase, "round started");

        let (snapshot, template, target_version) = {
            let models = self.models.read()?;
            let model = models.get(model_id)?;
            (
                Arc::new(model.weights.clone()),
                model.kind.template(),
                model.version,
            )
        };

        let selected = self.select_participants()?;
        if selected.is_empty() {
            tracing::warn!(round = %round_id, "no eligible participants");
            let round = TrainingRound {
                round_id,
                model_id: model_id.into(),
                target_version,
                invited: Vec::new(),
                accepted: Vec::new(),
                performance: PerformanceSnapshot::new(),
                outcome: RoundOutcome::NoValidUpdates,
                timestamp: now_nanos(),
            };
            self.history.write()?.push(round.clone());
            return Ok(round);
        }
        let invited: Vec<String> = selected.iter().map(|p| p.id.clone()).collect();

        phase = RoundPhase::Dispatching;
        tracing::info!(round = %round_id, invited = invited.len(), phase = ?phase, "dispatching");
        let responses = self.dispatch_and_collect(model_id, &selected, &snapshot);

        phase = RoundPhase::Collecting;
        tracing::debug!(round = %round_id, responses = responses.len(), phase = ?phase, "collecting");
        let mut accepted_updates: Vec<LocalUpdate> = Vec::new();
        let charge_steps = self.accountant.steps_for_round(self.config.local_epochs);
        for (participant_id, result) in responses {
            let update = match result {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!(round = %round_id, participant = %participant_id, error = %e, "dispatch failed");
                    continue;
                }
            };
            if update.model_id != model_id {
                tracing::warn!(
                    round = %round_id,
                    participant = %participant_id,
                    got = %update.model_id,
                    "update targets wrong model"
                );
                continue;
            }
            // Budget is charged before the update can be accepted; an
            // exhausted budget excludes the update even if it verifies
            match self.accountant.charge(&participant_id, charge_steps) {
                Ok(_) => accepted_updates.push(update),
                Err(e) => {
                    tracing::warn!(round = %round_id, participant = %participant_id, error = %e, "update excluded");
                }
            }
        }

        phase = RoundPhase::Aggregating;
        tracing::info!(round = %round_id, candidates = accepted_updates.len(), phase = ?phase, "aggregating");
        let aggregate = match self.aggregator.aggregate(&accepted_updates, &template) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                let outcome = match e {
                    FedError::NoValidUpdates => RoundOutcome::NoValidUpdates,
                    other => {
                        tracing::warn!(round = %round_id, error = %other, "aggregation failed");
                        RoundOutcome::AggregationFailed
                    }
                };
                let round = TrainingRound {
                    round_id,
                    model_id: model_id.into(),
                    target_version,
                    invited,
                    accepted: Vec::new(),
                    performance: PerformanceSnapshot::new(),
                    outcome,
                    timestamp: now_nanos(),
                };
                self.history.write()?.push(round.clone());
                return Ok(round);
            }
        };

        // Accepted set: participants whose update made it into the aggregate
        let accepted = aggregate.contributors;

        phase = RoundPhase::Evaluating;
        tracing::debug!(round = %round_id, accepted = accepted.len(), phase = ?phase, "evaluating");
        let performance = self.evaluate_aggregate(&aggregate.weights, &accepted)?;

        // Commit only after evaluation; the registry enforces the shape
        // template and the version increment
        self.models.write()?.commit_new_version(
            model_id,
            aggregate.weights,
            &accepted,
            performance.clone(),
        )?;

        phase = RoundPhase::Done;
        tracing::info!(round = %round_id, accepted = accepted.len(), phase = ?phase, "round completed");
        let round = TrainingRound {
            round_id,
            model_id: model_id.into(),
            target_version,
            invited,
            accepted,
            performance,
            outcome: RoundOutcome::Completed,
            timestamp: now_nanos(),
        };
        self.history.write()?.push(round.clone());
        Ok(round)
    }

    /// Eligible participants ranked by (contribution size, remaining budget)
    /// descending, ties broken by id ascending, capped at
    /// `participants_per_round`
    fn select_participants(&self) -> Result<Vec<Participant>> {
        let registry = self.participants.read()?;
        let mut eligible: Vec<Participant> = registry
            .list()
            .into_iter()
            .filter(Participant::is_eligible)
            .collect();
        eligible.sort_by(|a, b| {
            b.contribution_size
                .cmp(&a.contribution_size)
                .then(
                    b.remaining_budget()
                        .partial_cmp(&a.remaining_budget())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        });
        eligible.truncate(self.config.participants_per_round);
        Ok(eligible)
    }

    /// One worker per selected participant; barrier with per-participant
    /// timeout. An expired unit is excluded exactly like a dispatch failure.
    fn dispatch_and_collect(
        &self,
        model_id: &str,
        selected: &[Participant],
        snapshot: &Arc<ModelWeights>,
    ) -> HashMap<String, Result<LocalUpdate>> {
        let (tx, rx) = crossbeam_channel::unbounded();

        for participant in selected {
            let tx = tx.clone();
            let trainer = Arc::clone(&self.trainer);
            let participant = participant.clone();
            let snapshot = Arc::clone(snapshot);
            let model_id = model_id.to_string();
            let local_epochs = self.config.local_epochs;

            std::thread::spawn(move || {
                let id = participant.id.clone();
                // Collaborator errors surface as dispatch failures for the
                // round's bookkeeping
                let result = trainer
                    .train(&participant, &model_id, &snapshot, local_epochs)
                    .map_err(|e| FedError::DispatchError {
                        participant: id.clone(),
                        reason: e.to_string(),
                    });
                // Receiver may be gone if the barrier already expired
                let _ = tx.send((id, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.config.participant_timeout;
        let mut responses: HashMap<String, Result<LocalUpdate>> = HashMap::new();
        while responses.len() < selected.len() {
            match rx.recv_deadline(deadline) {
                Ok((participant_id, result)) => {
                    responses.insert(participant_id, result);
                }
                Err(_) => break, // barrier expired or all senders gone
            }
        }

        for participant in selected {
            if !responses.contains_key(&participant.id) {
                tracing::warn!(participant = %participant.id, "dispatch timed out");
                responses.insert(
                    participant.id.clone(),
                    Err(FedError::DispatchTimeout(participant.id.clone())),
                );
            }
        }
        responses
    }

    /// Contribution-size-weighted mean of the accepted participants' local
    /// evaluations; per-participant evaluation failures are absorbed
    fn evaluate_aggregate(
        &self,
        weights: &ModelWeights,
        accepted: &[String],
    ) -> Result<PerformanceSnapshot> {
        let contributions: HashMap<String, f64> = {
            let registry = self.participants.read()?;
            accepted
                .iter()
                .filter_map(|id| {
                    registry
                        .get(id)
                        .ok()
                        .map(|p| (id.clone(), p.contribution_size as f64))
                })
                .collect()
        };

        let mut weighted: PerformanceSnapshot = PerformanceSnapshot::new();
        let mut total_weight = 0.0;
        for participant_id in accepted {
            let contribution = match contributions.get(participant_id) {
                Some(c) => *c,
                None => continue,
            };
            match self.evaluator.evaluate(weights, participant_id) {
                Ok(metrics) => {
                    for (name, value) in metrics {
                        *weighted.entry(name).or_insert(0.0) += value * contribution;
                    }
                    total_weight += contribution;
                }
                Err(e) => {
                    tracing::warn!(participant = %participant_id, error = %e, "evaluation failed");
                }
            }
        }

        if total_weight > 0.0 {
            for value in weighted.values_mut() {
                *value /= total_weight;
            }
        } else {
            weighted.clear();
        }
        Ok(weighted)
    }

    // ── Multi-round driver ─────────────────────────────────────────────

    /// Runs rounds until the convergence threshold is met, the round budget
    /// is exhausted, no eligible participants remain, or a stop is
    /// requested. Stop requests are honored between rounds only.
    pub fn train(&self, model_id: &str) -> Result<TrainingReport> {
        let mut previous_metric: Option<f64> = None;
        let mut rounds_run = 0;
        let mut completed_rounds = 0;
        let mut converged = false;
        let mut stopped = false;

        for _ in 0..self.config.max_rounds {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(model = %model_id, "stop requested; halting between rounds");
                stopped = true;
                break;
            }

            let round = self.start_training_round(model_id)?;
            rounds_run += 1;

            match round.outcome {
                RoundOutcome::Completed => {
                    completed_rounds += 1;
                    let current = round
                        .performance
                        .get(&self.config.convergence_metric)
                        .copied();
                    if let (Some(current), Some(previous)) = (current, previous_metric) {
                        if (current - previous).abs() < self.config.convergence_threshold {
                            tracing::info!(
                                model = %model_id,
                                rounds = rounds_run,
                                "converged"
                            );
                            converged = true;
                            break;
                        }
                    }
                    if current.is_some() {
                        previous_metric = current;
                    }
                }
                // Zero eligible participants: nothing can change without
                // external registration, so the driver terminates
                RoundOutcome::NoValidUpdates if round.invited.is_empty() => break,
                // Fatal for that round only; retry with a fresh selection
                RoundOutcome::NoValidUpdates | RoundOutcome::AggregationFailed => {
                    tracing::warn!(round = %round.round_id, outcome = ?round.outcome, "round failed");
                }
            }
        }

        let status = self.get_model_status(model_id)?;
        Ok(TrainingReport {
            model_id: model_id.into(),
            rounds_run,
            completed_rounds,
            converged,
            stopped,
            final_version: status.version,
            final_performance: status.performance,
        })
    }
}
