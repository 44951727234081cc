//! The deliberation engine — drives a session through
//! Analyze -> Critique -> Synthesize -> Evaluate, refining until
//! consensus, budget, or the iteration cap stops it.
//!
//! Concurrency model: the engine's owner task is the only writer of
//! session state. Each phase fans out one child per agent (analyze) or
//! per ordered pair (critique) through a `JoinSet`; children rejoin at a
//! barrier before the phase transition. Per-call failures come back as
//! values; only phase-level starvation fails the session.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use deliberation::prompts::builtin::REFINEMENT_TEMPLATE;
use deliberation::{
    avg_call_cost, calls_per_iteration, session_totals, AgentAnalysis, AgentId, AggregateMetrics,
    ConsensusEvaluator, Critique, EvaluationDecision, EvaluationInputs, FailureReason,
    FinalResult, IterationSnapshot, Phase, PromptVars, Session, SessionEvent, SessionPhase,
    SessionProgress, SessionStatus, SharedEventBus, SharedSessionStore, StopReason, StoreError,
    Synthesis, TerminationError,
};

use crate::compose;
use crate::error::AgentCallError;
use crate::providers::ProviderRegistry;
use crate::runner::{AgentRunner, CallSpec};

/// Errors surfaced before a run starts. Once the state machine is
/// moving, failures become part of the FinalResult instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} is already running")]
    AlreadyRunning(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Per-session driver over the shared runner and store.
pub struct DeliberationEngine {
    store: SharedSessionStore,
    runner: Arc<AgentRunner>,
    registry: Arc<ProviderRegistry>,
    bus: SharedEventBus,
    session_deadline: Duration,
}

/// Outcome of one fan-out phase.
enum PhaseOutcome<T> {
    Done(Vec<T>),
    Cancelled,
}

impl DeliberationEngine {
    pub fn new(
        store: SharedSessionStore,
        runner: Arc<AgentRunner>,
        registry: Arc<ProviderRegistry>,
        bus: SharedEventBus,
        session_deadline: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            registry,
            bus,
            session_deadline,
        }
    }

    /// Drive `session_id` to a terminal state and return its FinalResult.
    ///
    /// Running on a session that already reached a terminal state is a
    /// no-op returning the stored result.
    pub async fn run(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<FinalResult, EngineError> {
        let session = match self.store.load_session(session_id) {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => return Err(EngineError::NotFound(session_id.into())),
            Err(e) => return Err(e.into()),
        };

        if session.status.is_terminal() {
            if let Some(result) = self.store.load_final(session_id)? {
                return Ok(result);
            }
            return Err(EngineError::AlreadyRunning(format!(
                "session {} is terminal but has no final result",
                session_id
            )));
        }
        if session.status == SessionStatus::Running {
            return Err(EngineError::AlreadyRunning(session_id.into()));
        }
        session
            .settings
            .validate()
            .map_err(EngineError::InvalidSettings)?;

        self.store
            .update_status(session_id, SessionStatus::Running)?;
        tracing::info!(session = session_id, task_type = %session.task_type, "session started");

        Ok(self.drive(session, cancel).await)
    }

    /// The state machine proper. Every exit path produces a FinalResult.
    async fn drive(&self, session: Session, cancel: CancellationToken) -> FinalResult {
        let started = Instant::now();
        let mut progress = SessionProgress::new(&session.id);
        let agents = session.settings.agents_in_order();
        let mut last_synthesis: Option<Synthesis> = None;
        let mut iteration: u32 = 1;

        loop {
            // ── Analyze ────────────────────────────────────────────────
            if let Err(result) = self.gate(&session, &progress, &cancel, &started).await {
                return result;
            }
            if progress
                .transition(SessionPhase::Analyzing(iteration), "analyze fan-out")
                .is_err()
            {
                return self
                    .fail(
                        &session,
                        &mut progress,
                        iteration,
                        FailureReason::PersistenceFailure,
                        "illegal phase transition".into(),
                    )
                    .await;
            }
            self.emit_phase(&session.id, Phase::Analyze, iteration);

            let analyses = match self
                .analyze_phase(&session, &agents, iteration, &started, &cancel)
                .await
            {
                PhaseOutcome::Done(analyses) => analyses,
                PhaseOutcome::Cancelled => {
                    return self.cancelled(&session, &mut progress, iteration).await
                }
            };

            let min_required = if agents.len() == 1 { 1 } else { 2 };
            if analyses.len() < min_required {
                return self
                    .fail(
                        &session,
                        &mut progress,
                        iteration,
                        FailureReason::TooFewAnalyses,
                        format!(
                            "{} of {} analyses succeeded (minimum {})",
                            analyses.len(),
                            agents.len(),
                            min_required
                        ),
                    )
                    .await;
            }

            // ── Critique ───────────────────────────────────────────────
            let participants: Vec<AgentId> = analyses.iter().map(|a| a.agent).collect();
            let mut critiques: Vec<Critique> = Vec::new();
            if participants.len() >= 2 {
                if let Err(result) = self.gate(&session, &progress, &cancel, &started).await {
                    return result;
                }
                progress
                    .transition(SessionPhase::Critiquing(iteration), "critique fan-out")
                    .ok();
                self.emit_phase(&session.id, Phase::Critique, iteration);

                match self
                    .critique_phase(&session, &analyses, iteration, &started, &cancel)
                    .await
                {
                    PhaseOutcome::Done(done) => critiques = done,
                    PhaseOutcome::Cancelled => {
                        return self.cancelled(&session, &mut progress, iteration).await
                    }
                }

                let n = participants.len();
                if critiques.is_empty() {
                    // Degrade to an analyses-only iteration.
                    tracing::warn!(
                        session = %session.id,
                        iteration,
                        "all critiques failed, proceeding with analyses only"
                    );
                } else if critiques.len() < n - 1 {
                    return self
                        .fail(
                            &session,
                            &mut progress,
                            iteration,
                            FailureReason::TooFewCritiques,
                            format!(
                                "{} of {} critiques succeeded (minimum {})",
                                critiques.len(),
                                n * (n - 1),
                                n - 1
                            ),
                        )
                        .await;
                }
            }

            // ── Synthesize ─────────────────────────────────────────────
            if let Err(result) = self.gate(&session, &progress, &cancel, &started).await {
                return result;
            }
            progress
                .transition(SessionPhase::Synthesizing(iteration), "synthesizer call")
                .ok();
            self.emit_phase(&session.id, Phase::Synthesize, iteration);

            let synthesis = match self
                .synthesize_phase(&session, &analyses, &critiques, iteration, &started, &cancel)
                .await
            {
                Ok(synthesis) => synthesis,
                Err(AgentCallError::Cancelled) => {
                    return self.cancelled(&session, &mut progress, iteration).await
                }
                Err(e) => {
                    return self
                        .fail(
                            &session,
                            &mut progress,
                            iteration,
                            FailureReason::SynthesisFailed,
                            e.to_string(),
                        )
                        .await;
                }
            };

            if let Err(e) = self.store.append_synthesis(&synthesis) {
                return self
                    .fail(
                        &session,
                        &mut progress,
                        iteration,
                        FailureReason::PersistenceFailure,
                        e.to_string(),
                    )
                    .await;
            }
            self.bus.publish(SessionEvent::SynthesisReady {
                session_id: session.id.clone(),
                iteration,
                consensus_level: synthesis.consensus_level,
                timestamp: Utc::now(),
            });
            last_synthesis = Some(synthesis.clone());

            // ── Evaluate ───────────────────────────────────────────────
            progress
                .transition(SessionPhase::Evaluating(iteration), "consensus evaluation")
                .ok();

            let metrics = self.store.list_metrics(&session.id).unwrap_or_default();
            let totals = session_totals(&metrics);
            let evaluator = ConsensusEvaluator::new(session.settings.consensus_threshold);
            let decision = evaluator.evaluate(&EvaluationInputs {
                consensus_level: synthesis.consensus_level,
                iteration,
                max_iterations: session.settings.max_iterations,
                spent_usd: totals.cost_usd,
                budget_usd: session.settings.budget_usd,
                recent_avg_call_cost: avg_call_cost(&metrics),
                calls_per_iteration: calls_per_iteration(agents.len()),
            });
            let snapshot = IterationSnapshot::compute(iteration, &critiques, &synthesis);
            self.bus.publish(SessionEvent::IterationCompleted {
                session_id: session.id.clone(),
                iteration,
                decision: decision.label(),
                critique_consensus_estimate: snapshot.critique_consensus_estimate,
                timestamp: Utc::now(),
            });
            tracing::info!(
                session = %session.id,
                iteration,
                consensus = synthesis.consensus_level,
                decision = %decision.label(),
                "iteration complete"
            );

            match decision {
                EvaluationDecision::Refine { next_iteration } => {
                    iteration = next_iteration;
                }
                EvaluationDecision::Stop {
                    reason: StopReason::BudgetFloor,
                } => {
                    // The panel wanted another round but cannot afford one.
                    return self
                        .fail(
                            &session,
                            &mut progress,
                            iteration,
                            FailureReason::BudgetExhausted,
                            format!(
                                "consensus {:.2} below threshold {:.2} with budget exhausted",
                                synthesis.consensus_level, session.settings.consensus_threshold
                            ),
                        )
                        .await;
                }
                EvaluationDecision::Stop { .. } => {
                    progress
                        .transition(SessionPhase::Completed, &decision.label())
                        .ok();
                    return self
                        .complete(&session, iteration, last_synthesis.clone())
                        .await;
                }
            }
        }
    }

    /// Pre-phase gate: cancellation, wall-clock deadline, hard budget.
    /// `Err` carries the terminal FinalResult to return.
    async fn gate(
        &self,
        session: &Session,
        progress: &SessionProgress,
        cancel: &CancellationToken,
        started: &Instant,
    ) -> Result<(), FinalResult> {
        let iteration = progress.current_iteration().max(1);
        if cancel.is_cancelled() {
            let mut progress = progress.clone();
            return Err(self.cancelled(session, &mut progress, iteration).await);
        }
        if started.elapsed() >= self.session_deadline {
            let mut progress = progress.clone();
            return Err(self
                .fail(
                    session,
                    &mut progress,
                    iteration,
                    FailureReason::DeadlineExceeded,
                    format!("session exceeded {:?}", self.session_deadline),
                )
                .await);
        }
        let metrics = self.store.list_metrics(&session.id).unwrap_or_default();
        let spent = session_totals(&metrics).cost_usd;
        if spent >= session.settings.budget_usd {
            let mut progress = progress.clone();
            return Err(self
                .fail(
                    session,
                    &mut progress,
                    iteration,
                    FailureReason::BudgetExhausted,
                    format!(
                        "spent {:.6} of {:.6} USD before phase start",
                        spent, session.settings.budget_usd
                    ),
                )
                .await);
        }
        Ok(())
    }

    fn residual(&self, started: &Instant) -> Duration {
        self.session_deadline.saturating_sub(started.elapsed())
    }

    fn emit_phase(&self, session_id: &str, phase: Phase, iteration: u32) {
        self.bus.publish(SessionEvent::PhaseStarted {
            session_id: session_id.to_string(),
            phase,
            iteration,
            timestamp: Utc::now(),
        });
    }

    /// Fan out one analyze call per enabled agent and persist survivors.
    async fn analyze_phase(
        &self,
        session: &Session,
        agents: &[AgentId],
        iteration: u32,
        started: &Instant,
        cancel: &CancellationToken,
    ) -> PhaseOutcome<AgentAnalysis> {
        // Refinement context is composed per agent from the previous
        // iteration's records, looked up at prompt-composition time.
        let prior_critiques = if iteration > 1 {
            self.store.list_critiques(&session.id).unwrap_or_default()
        } else {
            Vec::new()
        };
        let prior_synthesis = if iteration > 1 {
            self.store
                .list_syntheses(&session.id)
                .unwrap_or_default()
                .into_iter()
                .find(|s| s.iteration == iteration - 1)
        } else {
            None
        };

        let mut join_set: JoinSet<(AgentId, Result<AgentAnalysis, AgentCallError>)> =
            JoinSet::new();

        for &agent in agents {
            let spec = match self.call_spec(session, agent, Phase::Analyze, iteration, started) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!(session = %session.id, agent = %agent, error = %e, "skipping agent");
                    continue;
                }
            };

            let refinement = match (&prior_synthesis, iteration > 1) {
                (Some(synthesis), true) => PromptVars::new()
                    .set("iteration", iteration.to_string())
                    .set("previous_synthesis", compose::format_synthesis(synthesis))
                    .set(
                        "prior_critiques",
                        compose::format_critiques_of(&prior_critiques, agent, iteration - 1),
                    )
                    .apply(REFINEMENT_TEMPLATE),
                _ => String::new(),
            };

            let vars = PromptVars::new()
                .set("task", session.task_text.clone())
                .set("task_type", session.task_type.to_string())
                .set(
                    "context",
                    session.context_text.clone().unwrap_or_else(|| "(none)".into()),
                )
                .set("refinement", refinement);

            let runner = self.runner.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let result = runner.run_analysis(&spec, &vars, &cancel).await;
                (agent, result)
            });
        }

        let mut analyses = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (agent, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(session = %session.id, error = %e, "analysis task panicked");
                    continue;
                }
            };
            match result {
                Ok(analysis) => {
                    if let Err(e) = self.store.append_analysis(&analysis) {
                        tracing::error!(session = %session.id, agent = %agent, error = %e, "failed to persist analysis");
                        continue;
                    }
                    self.bus.publish(SessionEvent::AgentCompleted {
                        session_id: session.id.clone(),
                        agent,
                        phase: Phase::Analyze,
                        iteration,
                        duration_ms: analysis.duration_ms,
                        timestamp: Utc::now(),
                    });
                    analyses.push(analysis);
                }
                Err(AgentCallError::Cancelled) => {
                    join_set.abort_all();
                    return PhaseOutcome::Cancelled;
                }
                Err(e) => {
                    tracing::warn!(
                        session = %session.id,
                        agent = %agent,
                        iteration,
                        error = %e,
                        "analysis failed"
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }
        analyses.sort_by_key(|a| a.agent.as_str());
        PhaseOutcome::Done(analyses)
    }

    /// Fan out critiques over ordered pairs of participating agents.
    async fn critique_phase(
        &self,
        session: &Session,
        analyses: &[AgentAnalysis],
        iteration: u32,
        started: &Instant,
        cancel: &CancellationToken,
    ) -> PhaseOutcome<Critique> {
        let mut join_set: JoinSet<(AgentId, AgentId, Result<Critique, AgentCallError>)> =
            JoinSet::new();

        for critic in analyses.iter().map(|a| a.agent) {
            for target in analyses.iter().map(|a| a.agent) {
                if critic == target {
                    continue;
                }
                let spec = match self.call_spec(session, critic, Phase::Critique, iteration, started)
                {
                    Ok(spec) => spec,
                    Err(e) => {
                        tracing::warn!(session = %session.id, agent = %critic, error = %e, "skipping critic");
                        continue;
                    }
                };

                let vars = PromptVars::new()
                    .set("task", session.task_text.clone())
                    .set("task_type", session.task_type.to_string())
                    .set("target_agent", target.role_title())
                    .set(
                        "other_analyses",
                        compose::format_analyses_marking(analyses, target),
                    );

                let runner = self.runner.clone();
                let cancel = cancel.clone();
                join_set.spawn(async move {
                    let result = runner.run_critique(&spec, target, &vars, &cancel).await;
                    (critic, target, result)
                });
            }
        }

        let mut critiques = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (from, to, result) = match joined {
                Ok(tuple) => tuple,
                Err(e) => {
                    tracing::error!(session = %session.id, error = %e, "critique task panicked");
                    continue;
                }
            };
            match result {
                Ok(critique) => {
                    if let Err(e) = self.store.append_critique(&critique) {
                        tracing::error!(session = %session.id, error = %e, "failed to persist critique");
                        continue;
                    }
                    self.bus.publish(SessionEvent::CritiqueCompleted {
                        session_id: session.id.clone(),
                        iteration,
                        from_agent: from,
                        to_agent: to,
                        timestamp: Utc::now(),
                    });
                    critiques.push(critique);
                }
                Err(AgentCallError::Cancelled) => {
                    join_set.abort_all();
                    return PhaseOutcome::Cancelled;
                }
                Err(e) => {
                    tracing::warn!(
                        session = %session.id,
                        from = %from,
                        to = %to,
                        iteration,
                        error = %e,
                        "critique failed, omitting"
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }
        PhaseOutcome::Done(critiques)
    }

    /// The single synthesizer call over this iteration's records.
    async fn synthesize_phase(
        &self,
        session: &Session,
        analyses: &[AgentAnalysis],
        critiques: &[Critique],
        iteration: u32,
        started: &Instant,
        cancel: &CancellationToken,
    ) -> Result<Synthesis, AgentCallError> {
        let synthesizer = session.settings.synthesizer;
        let spec = self
            .call_spec(session, synthesizer, Phase::Synthesize, iteration, started)
            .map_err(AgentCallError::Configuration)?;

        let vars = PromptVars::new()
            .set("task", session.task_text.clone())
            .set("task_type", session.task_type.to_string())
            .set("analyses", compose::format_analyses(analyses))
            .set("critiques", compose::format_critiques(critiques));

        let synthesis = self.runner.run_synthesis(&spec, &vars, cancel).await?;
        self.bus.publish(SessionEvent::AgentCompleted {
            session_id: session.id.clone(),
            agent: synthesizer,
            phase: Phase::Synthesize,
            iteration,
            duration_ms: 0,
            timestamp: Utc::now(),
        });
        Ok(synthesis)
    }

    fn call_spec(
        &self,
        session: &Session,
        agent: AgentId,
        phase: Phase,
        iteration: u32,
        started: &Instant,
    ) -> Result<CallSpec, String> {
        let override_model = session.settings.models.get(&agent).map(|m| m.as_str());
        let model = self
            .registry
            .model_for(agent, override_model)
            .ok_or_else(|| format!("no provider binding for {}", agent))?;
        Ok(CallSpec {
            session_id: session.id.clone(),
            agent,
            phase,
            iteration,
            model,
            // Synthesis integrates rather than explores; keep it cooler.
            temperature: match phase {
                Phase::Synthesize => (session.settings.temperature * 0.7).min(1.0),
                _ => session.settings.temperature,
            },
            max_tokens: 4096,
            residual: self.residual(started),
        })
    }

    /// Assemble the FinalResult from the store (the source of truth).
    fn assemble(
        &self,
        session: &Session,
        iterations_used: u32,
        synthesis: Option<Synthesis>,
        error: Option<TerminationError>,
    ) -> FinalResult {
        let analyses = self.store.list_analyses(&session.id).unwrap_or_default();
        let critiques = self.store.list_critiques(&session.id).unwrap_or_default();
        let metrics = self.store.list_metrics(&session.id).unwrap_or_default();
        let totals = session_totals(&metrics);

        let agents_used: Vec<AgentId> = analyses
            .iter()
            .map(|a| a.agent)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        FinalResult {
            session_id: session.id.clone(),
            synthesis,
            analyses,
            critiques,
            metrics: AggregateMetrics {
                total_tokens: totals.total_tokens(),
                total_cost_usd: totals.cost_usd,
                iterations_used,
                agents_used,
            },
            error,
        }
    }

    async fn complete(
        &self,
        session: &Session,
        iterations_used: u32,
        synthesis: Option<Synthesis>,
    ) -> FinalResult {
        let result = self.assemble(session, iterations_used, synthesis, None);
        self.persist_terminal(session, &result, SessionStatus::Completed);
        self.bus.publish(SessionEvent::SessionCompleted {
            session_id: session.id.clone(),
            iterations_used,
            timestamp: Utc::now(),
        });
        result
    }

    async fn fail(
        &self,
        session: &Session,
        progress: &mut SessionProgress,
        iterations_used: u32,
        reason: FailureReason,
        message: String,
    ) -> FinalResult {
        progress.transition(SessionPhase::Failed, &message).ok();
        let last_synthesis = self
            .store
            .list_syntheses(&session.id)
            .unwrap_or_default()
            .into_iter()
            .last();
        let result = self.assemble(
            session,
            iterations_used,
            last_synthesis,
            Some(TerminationError {
                reason,
                message: message.clone(),
            }),
        );
        self.persist_terminal(session, &result, SessionStatus::Failed);
        self.bus.publish(SessionEvent::SessionFailed {
            session_id: session.id.clone(),
            reason,
            message,
            timestamp: Utc::now(),
        });
        result
    }

    async fn cancelled(
        &self,
        session: &Session,
        progress: &mut SessionProgress,
        iterations_used: u32,
    ) -> FinalResult {
        progress
            .transition(SessionPhase::Cancelled, "cancelled by client")
            .ok();
        let last_synthesis = self
            .store
            .list_syntheses(&session.id)
            .unwrap_or_default()
            .into_iter()
            .last();
        let result = self.assemble(
            session,
            iterations_used,
            last_synthesis,
            Some(TerminationError {
                reason: FailureReason::Cancelled,
                message: "session cancelled".into(),
            }),
        );
        self.persist_terminal(session, &result, SessionStatus::Cancelled);
        self.bus.publish(SessionEvent::SessionCancelled {
            session_id: session.id.clone(),
            timestamp: Utc::now(),
        });
        result
    }

    fn persist_terminal(&self, session: &Session, result: &FinalResult, status: SessionStatus) {
        if let Err(e) = self.store.finalize(result) {
            tracing::error!(session = %session.id, error = %e, "failed to persist final result");
        }
        if let Err(e) = self.store.update_status(&session.id, status) {
            tracing::error!(session = %session.id, error = %e, "failed to persist terminal status");
        }
        tracing::info!(session = %session.id, %status, "session finished");
    }
}
