//! Agent runner — turns a logical agent call into a validated record.
//!
//! Wraps a provider adapter with prompt composition, per-call deadlines,
//! exponential backoff on transient failures, parse-and-validate with a
//! single strict-JSON reprompt, cost accounting, and metric emission.
//! One RunMetric is emitted per provider attempt, success or not.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use deliberation::parser::{parse_phase, PhaseOutput};
use deliberation::prompts::builtin::STRICT_JSON_SUFFIX;
use deliberation::{
    AgentAnalysis, AgentId, CallStatus, Critique, Phase, PriceTable, PromptStore, PromptType,
    PromptVars, RunMetric, SessionEvent, SharedEventBus, SharedSessionStore, Synthesis,
};

use crate::config::RetryConfig;
use crate::error::AgentCallError;
use crate::providers::{CallParams, ProviderRegistry};

/// One logical call the engine wants made.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub session_id: String,
    pub agent: AgentId,
    pub phase: Phase,
    pub iteration: u32,
    /// Resolved model id (session override already applied).
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Residual session deadline at the moment the call was issued.
    pub residual: Duration,
}

/// Usage attached to a successful call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Executes logical agent calls against the provider registry.
pub struct AgentRunner {
    registry: Arc<ProviderRegistry>,
    prompts: Arc<PromptStore>,
    prices: PriceTable,
    store: SharedSessionStore,
    bus: SharedEventBus,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl AgentRunner {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        prompts: Arc<PromptStore>,
        prices: PriceTable,
        store: SharedSessionStore,
        bus: SharedEventBus,
        retry: RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            prompts,
            prices,
            store,
            bus,
            retry,
            call_timeout,
        }
    }

    /// Backoff delay before retry `attempt` (1-based), with jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.backoff_base_ms as f64;
        let exact = base * self.retry.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let jitter = self.retry.backoff_jitter;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_millis((exact * factor).max(0.0) as u64)
    }

    fn emit_metric(
        &self,
        spec: &CallSpec,
        status: CallStatus,
        usage: CallUsage,
        error_message: Option<String>,
    ) {
        let metric = RunMetric {
            session_id: spec.session_id.clone(),
            agent: spec.agent,
            model: spec.model.clone(),
            phase: spec.phase,
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            cost_usd: usage.cost_usd,
            latency_ms: usage.duration_ms,
            status,
            error_message,
            created_at: Utc::now(),
        };
        metric.emit();
        if let Err(e) = self.store.append_metric(&metric) {
            tracing::warn!(session = %spec.session_id, error = %e, "failed to persist metric");
        }
        self.bus.publish(SessionEvent::Metric {
            metric,
            timestamp: Utc::now(),
        });
    }

    /// One raw provider attempt with the effective deadline applied.
    async fn attempt(
        &self,
        spec: &CallSpec,
        system_prompt: &str,
        user_prompt: &str,
        remaining: Duration,
        cancel: &CancellationToken,
    ) -> Result<(String, CallUsage), AgentCallError> {
        let binding = self
            .registry
            .binding(spec.agent)
            .ok_or_else(|| AgentCallError::Configuration(format!("no binding for {}", spec.agent)))?
            .clone();

        let _permit = tokio::select! {
            permit = self.registry.acquire(spec.agent) => permit,
            _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
        };

        let params = CallParams {
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
            stop: None,
            deadline: remaining.min(self.call_timeout),
        };

        let start = Instant::now();
        let invoke = binding
            .provider
            .invoke(system_prompt, user_prompt, &spec.model, &params);

        let result = tokio::select! {
            result = invoke => result,
            _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(completion) => {
                let cost = self
                    .prices
                    .cost_usd(&spec.model, completion.tokens_in, completion.tokens_out);
                let usage = CallUsage {
                    tokens_in: completion.tokens_in,
                    tokens_out: completion.tokens_out,
                    cost_usd: cost,
                    duration_ms,
                };
                if completion.text.trim().is_empty() {
                    self.emit_metric(
                        spec,
                        CallStatus::Error,
                        usage,
                        Some("empty output".to_string()),
                    );
                    return Err(AgentCallError::EmptyOutput);
                }
                Ok((completion.text, usage))
            }
            Err(provider_error) => {
                let status = if matches!(
                    provider_error,
                    crate::providers::ProviderError::Timeout { .. }
                ) {
                    CallStatus::Timeout
                } else {
                    CallStatus::Error
                };
                self.emit_metric(
                    spec,
                    status,
                    CallUsage {
                        duration_ms,
                        ..Default::default()
                    },
                    Some(provider_error.to_string()),
                );
                Err(AgentCallError::Provider(provider_error))
            }
        }
    }

    /// Execute a call to completion: retries, parse, one strict reprompt.
    ///
    /// Returns the parsed phase output plus the usage of the attempt that
    /// produced it.
    pub async fn call(
        &self,
        spec: &CallSpec,
        vars: &PromptVars,
        cancel: &CancellationToken,
    ) -> Result<(PhaseOutput, CallUsage), AgentCallError> {
        let system_prompt = self.prompts.resolve(spec.agent, PromptType::System);
        let template_type = match spec.phase {
            Phase::Analyze => PromptType::UserTemplate,
            Phase::Critique => PromptType::Critique,
            Phase::Synthesize => PromptType::Synthesis,
        };
        let user_prompt = vars.apply(&self.prompts.resolve(spec.agent, template_type));

        let started = Instant::now();
        let mut attempt_no: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentCallError::Cancelled);
            }
            let remaining = spec.residual.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(AgentCallError::DeadlineExceeded);
            }

            match self
                .attempt(spec, &system_prompt, &user_prompt, remaining, cancel)
                .await
            {
                Ok((text, usage)) => {
                    match parse_phase(spec.phase, &text) {
                        Ok(output) => {
                            self.emit_metric(spec, CallStatus::Success, usage, None);
                            return Ok((output, usage));
                        }
                        Err(parse_error) => {
                            // The transport succeeded but the payload did not
                            // validate; metric reflects the parse failure.
                            self.emit_metric(
                                spec,
                                CallStatus::Error,
                                usage,
                                Some(format!("parse: {}", parse_error.reason)),
                            );
                            tracing::warn!(
                                session = %spec.session_id,
                                agent = %spec.agent,
                                phase = %spec.phase,
                                reason = %parse_error.reason,
                                "output unparseable, reprompting with strict JSON"
                            );
                            return self
                                .strict_reprompt(
                                    spec,
                                    usage,
                                    &system_prompt,
                                    &user_prompt,
                                    started,
                                    cancel,
                                )
                                .await;
                        }
                    }
                }
                Err(err) if err.is_retriable() && attempt_no < self.retry.max_retries => {
                    attempt_no += 1;
                    let delay = self.backoff_delay(attempt_no);
                    tracing::debug!(
                        session = %spec.session_id,
                        agent = %spec.agent,
                        attempt = attempt_no,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One reprompt with the strict-JSON suffix appended. Not subject to
    /// further retries. When the failed output hit the token cap the
    /// reprompt doubles `max_tokens` so a truncated payload can finish.
    async fn strict_reprompt(
        &self,
        spec: &CallSpec,
        prior_usage: CallUsage,
        system_prompt: &str,
        user_prompt: &str,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<(PhaseOutput, CallUsage), AgentCallError> {
        let remaining = spec.residual.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(AgentCallError::DeadlineExceeded);
        }
        let mut spec = spec.clone();
        if prior_usage.tokens_out >= spec.max_tokens as u64 {
            tracing::warn!(
                session = %spec.session_id,
                agent = %spec.agent,
                max_tokens = spec.max_tokens,
                "output appears truncated, raising max_tokens for the reprompt"
            );
            spec.max_tokens = spec.max_tokens.saturating_mul(2);
        }
        let spec = &spec;
        let strict_prompt = format!("{}{}", user_prompt, STRICT_JSON_SUFFIX);
        let (text, usage) = self
            .attempt(spec, system_prompt, &strict_prompt, remaining, cancel)
            .await?;

        match parse_phase(spec.phase, &text) {
            Ok(output) => {
                self.emit_metric(spec, CallStatus::Success, usage, None);
                Ok((output, usage))
            }
            Err(parse_error) => {
                self.emit_metric(
                    spec,
                    CallStatus::Error,
                    usage,
                    Some(format!("parse: {}", parse_error.reason)),
                );
                Err(AgentCallError::Parse {
                    reason: parse_error.reason,
                })
            }
        }
    }

    /// Run an analyze call and build the analysis record.
    pub async fn run_analysis(
        &self,
        spec: &CallSpec,
        vars: &PromptVars,
        cancel: &CancellationToken,
    ) -> Result<AgentAnalysis, AgentCallError> {
        let (output, usage) = self.call(spec, vars, cancel).await?;
        let payload = match output {
            PhaseOutput::Analysis(p) => p,
            other => {
                return Err(AgentCallError::Parse {
                    reason: format!("expected analysis payload, got {:?}", other),
                })
            }
        };

        let confidence = match payload.confidence {
            Some(c) => c,
            None => {
                tracing::warn!(
                    session = %spec.session_id,
                    agent = %spec.agent,
                    "model omitted confidence, imputing 0.5"
                );
                0.5
            }
        };

        Ok(AgentAnalysis {
            session_id: spec.session_id.clone(),
            agent: spec.agent,
            iteration: spec.iteration,
            analysis_text: payload.analysis,
            confidence,
            key_points: payload.key_points,
            risks: payload.risks,
            assumptions: payload.assumptions,
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            cost_usd: usage.cost_usd,
            duration_ms: usage.duration_ms,
            created_at: Utc::now(),
        })
    }

    /// Run a critique call and build the critique record.
    pub async fn run_critique(
        &self,
        spec: &CallSpec,
        target: AgentId,
        vars: &PromptVars,
        cancel: &CancellationToken,
    ) -> Result<Critique, AgentCallError> {
        let (output, _usage) = self.call(spec, vars, cancel).await?;
        let payload = match output {
            PhaseOutput::Critique(p) => p,
            other => {
                return Err(AgentCallError::Parse {
                    reason: format!("expected critique payload, got {:?}", other),
                })
            }
        };

        Ok(Critique {
            session_id: spec.session_id.clone(),
            iteration: spec.iteration,
            from_agent: spec.agent,
            to_agent: target,
            score: payload.score,
            critique_text: payload.critique,
            weaknesses: payload.weaknesses,
            strengths: payload.strengths,
        })
    }

    /// Run the synthesizer call and build the synthesis record.
    pub async fn run_synthesis(
        &self,
        spec: &CallSpec,
        vars: &PromptVars,
        cancel: &CancellationToken,
    ) -> Result<Synthesis, AgentCallError> {
        let (output, _usage) = self.call(spec, vars, cancel).await?;
        let payload = match output {
            PhaseOutput::Synthesis(p) => p,
            other => {
                return Err(AgentCallError::Parse {
                    reason: format!("expected synthesis payload, got {:?}", other),
                })
            }
        };

        Ok(Synthesis {
            session_id: spec.session_id.clone(),
            iteration: spec.iteration,
            summary: payload.summary,
            conclusions: payload.conclusions,
            recommendations: payload.recommendations,
            formalized_result: payload.formalized_result,
            consensus_level: payload.consensus_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AgentBinding, ChatProvider, Completion, ProviderError};
    use async_trait::async_trait;
    use deliberation::{EventBus, MemoryStore, Session, SessionSettings, TaskType};
    use std::sync::Mutex;

    /// Provider that replays a scripted sequence of outcomes.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn invoke(
            &self,
            _system: &str,
            _user: &str,
            model: &str,
            _params: &CallParams,
        ) -> Result<Completion, ProviderError> {
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() {
                Ok("{}".to_string())
            } else {
                script.remove(0)
            };
            next.map(|text| Completion {
                text,
                tokens_in: 100,
                tokens_out: 50,
                model: model.to_string(),
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn analysis_json(confidence: Option<f64>) -> String {
        match confidence {
            Some(c) => format!(
                r#"{{"analysis": "detailed reasoning", "confidence": {}, "key_points": ["kp"]}}"#,
                c
            ),
            None => r#"{"analysis": "detailed reasoning", "key_points": ["kp"]}"#.to_string(),
        }
    }

    struct Fixture {
        runner: AgentRunner,
        store: SharedSessionStore,
        session_id: String,
    }

    fn fixture(script: Vec<Result<String, ProviderError>>) -> Fixture {
        let store: SharedSessionStore = Arc::new(MemoryStore::new());
        let session = Session::new("task", TaskType::Research, SessionSettings::default());
        store.create_session(&session).unwrap();

        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::new(script));
        let registry = Arc::new(ProviderRegistry::from_bindings(
            vec![AgentBinding {
                agent: AgentId::LogicalAnalyst,
                provider,
                default_model: "stub-model".into(),
            }],
            4,
        ));

        let retry = RetryConfig {
            backoff_base_ms: 1,
            ..Default::default()
        };
        let runner = AgentRunner::new(
            registry,
            Arc::new(PromptStore::new()),
            PriceTable::builtin(),
            store.clone(),
            EventBus::new().shared(),
            retry,
            Duration::from_secs(5),
        );
        Fixture {
            runner,
            store,
            session_id: session.id,
        }
    }

    fn spec(session_id: &str) -> CallSpec {
        CallSpec {
            session_id: session_id.to_string(),
            agent: AgentId::LogicalAnalyst,
            phase: Phase::Analyze,
            iteration: 1,
            model: "stub-model".into(),
            temperature: 0.7,
            max_tokens: 1024,
            residual: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_clean_call_emits_one_success_metric() {
        let f = fixture(vec![Ok(analysis_json(Some(0.8)))]);
        let cancel = CancellationToken::new();
        let analysis = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(analysis.confidence, 0.8);
        assert!(analysis.cost_usd > 0.0);

        let metrics = f.store.list_metrics(&f.session_id).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].status, CallStatus::Success);
    }

    #[tokio::test]
    async fn test_transient_error_retried_then_succeeds() {
        let f = fixture(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Ok(analysis_json(Some(0.6))),
        ]);
        let cancel = CancellationToken::new();
        let analysis = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(analysis.confidence, 0.6);

        // One error metric for the rate-limit, one success.
        let metrics = f.store.list_metrics(&f.session_id).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].status, CallStatus::Error);
        assert_eq!(metrics[1].status, CallStatus::Success);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_provider_error() {
        let f = fixture(vec![
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::RateLimited { retry_after: None }),
            Err(ProviderError::RateLimited { retry_after: None }),
        ]);
        let cancel = CancellationToken::new();
        let err = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentCallError::Provider(_)));
        // Default policy: 2 retries = 3 attempts = 3 metrics.
        assert_eq!(f.store.list_metrics(&f.session_id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let f = fixture(vec![
            Err(ProviderError::InvalidRequest("bad model".into())),
            Ok(analysis_json(Some(0.9))),
        ]);
        let cancel = CancellationToken::new();
        let err = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentCallError::Provider(_)));
        assert_eq!(f.store.list_metrics(&f.session_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prose_then_strict_reprompt_recovers() {
        let f = fixture(vec![
            Ok("Let me think about this in prose.".to_string()),
            Ok(analysis_json(Some(0.7))),
        ]);
        let cancel = CancellationToken::new();
        let analysis = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(analysis.confidence, 0.7);

        // Exactly one extra metric for the reprompt.
        let metrics = f.store.list_metrics(&f.session_id).unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].error_message.as_deref().unwrap().starts_with("parse:"));
        assert_eq!(metrics[1].status, CallStatus::Success);
    }

    #[tokio::test]
    async fn test_double_parse_failure_is_terminal() {
        let f = fixture(vec![
            Ok("prose one".to_string()),
            Ok("prose two".to_string()),
            Ok(analysis_json(Some(0.9))),
        ]);
        let cancel = CancellationToken::new();
        let err = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentCallError::Parse { .. }));
        assert_eq!(f.store.list_metrics(&f.session_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_confidence_imputed() {
        let f = fixture(vec![Ok(analysis_json(None))]);
        let cancel = CancellationToken::new();
        let analysis = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(analysis.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_empty_output_retried() {
        let f = fixture(vec![
            Ok("   ".to_string()),
            Ok(analysis_json(Some(0.4))),
        ]);
        let cancel = CancellationToken::new();
        let analysis = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(analysis.confidence, 0.4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(vec![Ok(analysis_json(Some(0.8)))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = f
            .runner
            .run_analysis(&spec(&f.session_id), &PromptVars::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentCallError::Cancelled));
    }

    #[tokio::test]
    async fn test_exhausted_residual_is_deadline_error() {
        let f = fixture(vec![Ok(analysis_json(Some(0.8)))]);
        let cancel = CancellationToken::new();
        let mut call_spec = spec(&f.session_id);
        call_spec.residual = Duration::ZERO;
        let err = f
            .runner
            .run_analysis(&call_spec, &PromptVars::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentCallError::DeadlineExceeded));
    }

    #[test]
    fn test_backoff_grows_and_respects_jitter_bounds() {
        // The fixture shortens backoff to 1ms; use the real defaults here.
        let f = fixture(vec![]);
        let runner = AgentRunner::new(
            Arc::new(ProviderRegistry::from_bindings(vec![], 1)),
            Arc::new(PromptStore::new()),
            PriceTable::builtin(),
            f.store.clone(),
            EventBus::new().shared(),
            RetryConfig::default(),
            Duration::from_secs(5),
        );
        let retry = RetryConfig::default();
        for attempt in 1..=3u32 {
            let exact = retry.backoff_base_ms as f64 * retry.backoff_factor.powi(attempt as i32 - 1);
            let low = (exact * (1.0 - retry.backoff_jitter)) as u128;
            let high = (exact * (1.0 + retry.backoff_jitter)) as u128 + 1;
            for _ in 0..20 {
                let d = runner.backoff_delay(attempt).as_millis();
                assert!(
                    d >= low && d <= high,
                    "attempt {}: {} not in [{}, {}]",
                    attempt,
                    d,
                    low,
                    high
                );
            }
        }
    }
}
