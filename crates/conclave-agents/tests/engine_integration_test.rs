//! End-to-end engine runs over deterministic scripted providers — no
//! network. Covers the happy path, refinement, budget exhaustion,
//! provider outage, parse recovery, cancellation, and the boundary
//! behaviors around single-agent sessions and the iteration cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conclave_agents::config::RetryConfig;
use conclave_agents::engine::DeliberationEngine;
use conclave_agents::providers::{
    AgentBinding, CallParams, ChatProvider, Completion, ProviderError, ProviderRegistry,
};
use conclave_agents::runner::AgentRunner;
use deliberation::{
    AgentId, EventBus, FailureReason, MemoryStore, PriceTable, PromptStore, Session,
    SessionSettings, SessionStatus, SharedEventBus, SharedSessionStore, TaskType,
};

// ── Scripted provider ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CallKind {
    Analyze,
    Critique,
    Synthesize,
}

type Responder = Box<dyn Fn(CallKind, usize) -> Result<String, ProviderError> + Send + Sync>;

/// Deterministic provider: classifies each call from the prompt text,
/// records it, and replies from a scripted responder.
struct ScriptedProvider {
    name: &'static str,
    tokens: (u64, u64),
    responder: Responder,
    counts: Mutex<HashMap<CallKind, usize>>,
    prompts: Mutex<Vec<(CallKind, String)>>,
    critique_delay: Option<Duration>,
    total_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            name,
            tokens: (100, 50),
            responder,
            counts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            critique_delay: None,
            total_calls: AtomicUsize::new(0),
        })
    }

    fn with_tokens(name: &'static str, tokens: (u64, u64), responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            name,
            tokens,
            responder,
            counts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            critique_delay: None,
            total_calls: AtomicUsize::new(0),
        })
    }

    fn with_critique_delay(
        name: &'static str,
        delay: Duration,
        responder: Responder,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            tokens: (100, 50),
            responder,
            counts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            critique_delay: Some(delay),
            total_calls: AtomicUsize::new(0),
        })
    }

    fn classify(user_prompt: &str) -> CallKind {
        if user_prompt.contains("Critique the [TARGET]") {
            CallKind::Critique
        } else if user_prompt.contains("Integrate the panel's work") {
            CallKind::Synthesize
        } else {
            CallKind::Analyze
        }
    }

    fn prompts_of(&self, kind: CallKind) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(
        &self,
        _system: &str,
        user_prompt: &str,
        model: &str,
        _params: &CallParams,
    ) -> Result<Completion, ProviderError> {
        let kind = Self::classify(user_prompt);
        if kind == CallKind::Critique {
            if let Some(delay) = self.critique_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let index = {
            let mut counts = self.counts.lock().unwrap();
            let entry = counts.entry(kind).or_insert(0);
            let index = *entry;
            *entry += 1;
            index
        };
        self.prompts
            .lock()
            .unwrap()
            .push((kind, user_prompt.to_string()));

        (self.responder)(kind, index).map(|text| Completion {
            text,
            tokens_in: self.tokens.0,
            tokens_out: self.tokens.1,
            model: model.to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// ── Payload builders ───────────────────────────────────────────────

fn analysis_json(confidence: f64) -> String {
    format!(
        r#"{{"analysis": "independent position", "confidence": {}, "key_points": ["kp-1"], "risks": ["r-1"], "assumptions": ["a-1"]}}"#,
        confidence
    )
}

fn critique_json(score: f64) -> String {
    format!(
        r#"{{"critique": "weak spots found", "score": {}, "weaknesses": ["no sizing"], "strengths": ["clear"]}}"#,
        score
    )
}

fn synthesis_json(consensus: f64) -> String {
    format!(
        r#"{{
            "summary": "integrated view",
            "conclusions": [{{"statement": "viable", "probability": 0.8, "falsification_condition": "CAC too high"}}],
            "recommendations": ["proceed carefully"],
            "consensus_level": {}
        }}"#,
        consensus
    )
}

/// Well-behaved responder: confident analyses, mid critiques, scripted
/// consensus per synthesis call.
fn default_responder(consensus: Vec<f64>) -> Responder {
    Box::new(move |kind, index| match kind {
        CallKind::Analyze => Ok(analysis_json(0.8)),
        CallKind::Critique => Ok(critique_json(7.0)),
        CallKind::Synthesize => {
            let level = consensus.get(index).copied().unwrap_or(0.9);
            Ok(synthesis_json(level))
        }
    })
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    engine: DeliberationEngine,
    store: SharedSessionStore,
    bus: SharedEventBus,
}

fn provider_name(agent: AgentId) -> &'static str {
    match agent {
        AgentId::LogicalAnalyst => "stub-openai",
        AgentId::SystemsArchitect => "stub-anthropic",
        AgentId::AlternativesGenerator => "stub-gemini",
        AgentId::FormalAnalyst => "stub-deepseek",
    }
}

fn harness(providers: Vec<(AgentId, Arc<ScriptedProvider>)>) -> Harness {
    let store: SharedSessionStore = Arc::new(MemoryStore::new());
    let bus = EventBus::new().shared();

    let bindings = providers
        .into_iter()
        .map(|(agent, provider)| AgentBinding {
            agent,
            provider: provider as Arc<dyn ChatProvider>,
            default_model: "stub-model".into(),
        })
        .collect();
    let registry = Arc::new(ProviderRegistry::from_bindings(bindings, 4));

    let runner = Arc::new(AgentRunner::new(
        registry.clone(),
        Arc::new(PromptStore::new()),
        PriceTable::builtin(),
        store.clone(),
        bus.clone(),
        RetryConfig {
            backoff_base_ms: 1,
            ..Default::default()
        },
        Duration::from_secs(5),
    ));

    let engine = DeliberationEngine::new(
        store.clone(),
        runner,
        registry,
        bus.clone(),
        Duration::from_secs(30),
    );

    Harness { engine, store, bus }
}

fn panel(consensus: Vec<f64>) -> Vec<(AgentId, Arc<ScriptedProvider>)> {
    AgentId::all()
        .into_iter()
        .map(|agent| {
            (
                agent,
                ScriptedProvider::new(provider_name(agent), default_responder(consensus.clone())),
            )
        })
        .collect()
}

fn make_session(store: &SharedSessionStore, settings: SessionSettings) -> Session {
    let session = Session::new("Evaluate SaaS market entry", TaskType::Strategy, settings);
    store.create_session(&session).unwrap();
    session
}

// ── S1: happy path, single iteration ───────────────────────────────

#[tokio::test]
async fn s1_happy_path_single_iteration() {
    let h = harness(panel(vec![0.85]));
    let session = make_session(
        &h.store,
        SessionSettings {
            consensus_threshold: 0.8,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.metrics.iterations_used, 1);
    assert_eq!(result.analyses.len(), 4);
    assert_eq!(result.critiques.len(), 12);
    assert_eq!(result.synthesis.as_ref().unwrap().consensus_level, 0.85);
    assert_eq!(result.metrics.agents_used.len(), 4);
    assert_eq!(
        h.store.load_session(&session.id).unwrap().status,
        SessionStatus::Completed
    );
    assert_eq!(h.store.list_syntheses(&session.id).unwrap().len(), 1);
}

// ── S2: refine then stop ───────────────────────────────────────────

#[tokio::test]
async fn s2_refine_then_stop_feeds_critiques_back() {
    let providers = panel(vec![0.70, 0.82]);
    let logical = providers
        .iter()
        .find(|(agent, _)| *agent == AgentId::LogicalAnalyst)
        .unwrap()
        .1
        .clone();

    let h = harness(providers);
    let session = make_session(
        &h.store,
        SessionSettings {
            consensus_threshold: 0.8,
            max_iterations: 3,
            budget_usd: 10.0,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.metrics.iterations_used, 2);
    assert_eq!(result.synthesis.as_ref().unwrap().consensus_level, 0.82);
    // Two iterations of four analyses each.
    assert_eq!(result.analyses.len(), 8);
    assert_eq!(h.store.list_syntheses(&session.id).unwrap().len(), 2);

    // The second analyze prompt must carry the refinement context:
    // previous synthesis plus the critiques aimed at this agent.
    let analyze_prompts = logical.prompts_of(CallKind::Analyze);
    assert_eq!(analyze_prompts.len(), 2);
    assert!(!analyze_prompts[0].contains("refinement round"));
    assert!(analyze_prompts[1].contains("refinement round 2"));
    assert!(analyze_prompts[1].contains("integrated view"));
    assert!(analyze_prompts[1].contains("weak spots found"));
}

// ── Consensus monotonicity under refinement ────────────────────────

#[tokio::test]
async fn consensus_is_nondecreasing_across_refinements() {
    let h = harness(panel(vec![0.60, 0.71, 0.83]));
    let session = make_session(
        &h.store,
        SessionSettings {
            consensus_threshold: 0.8,
            max_iterations: 5,
            budget_usd: 10.0,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(result.error.is_none());

    let syntheses = h.store.list_syntheses(&session.id).unwrap();
    assert_eq!(syntheses.len(), 3);
    for pair in syntheses.windows(2) {
        assert!(pair[1].consensus_level >= pair[0].consensus_level);
    }
}

// ── S3: budget stop after first synthesis ──────────────────────────

#[tokio::test]
async fn s3_budget_exhausted_after_first_synthesis() {
    // Unknown model falls back to default pricing (0.001/0.002 per 1k):
    // 5000 in + 2500 out tokens = 0.01 USD per call. Two agents run
    // 2 analyses + 2 critiques + 1 synthesis = 5 calls = the full 0.05.
    let responder = || default_responder(vec![0.5]);
    let h = harness(vec![
        (
            AgentId::LogicalAnalyst,
            ScriptedProvider::with_tokens("stub-openai", (5000, 2500), responder()),
        ),
        (
            AgentId::SystemsArchitect,
            ScriptedProvider::with_tokens("stub-anthropic", (5000, 2500), responder()),
        ),
    ]);
    let session = make_session(
        &h.store,
        SessionSettings {
            enabled_agents: vec![AgentId::LogicalAnalyst, AgentId::SystemsArchitect],
            consensus_threshold: 0.8,
            max_iterations: 3,
            budget_usd: 0.05,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    let error = result.error.as_ref().expect("expected budget failure");
    assert_eq!(error.reason, FailureReason::BudgetExhausted);
    // The first synthesis completed before the budget gate tripped.
    assert!(result.synthesis.is_some());
    assert_eq!(result.metrics.iterations_used, 1);
    assert!(result.metrics.total_cost_usd <= 0.05 + 0.011);
    assert_eq!(
        h.store.load_session(&session.id).unwrap().status,
        SessionStatus::Failed
    );
}

// ── S4: one provider persistently rate-limited ─────────────────────

#[tokio::test]
async fn s4_one_provider_down_session_still_completes() {
    let mut providers = panel(vec![0.9]);
    // The alternatives generator's provider always rate-limits.
    for (agent, provider) in providers.iter_mut() {
        if *agent == AgentId::AlternativesGenerator {
            *provider = ScriptedProvider::new(
                "stub-gemini",
                Box::new(|_, _| Err(ProviderError::RateLimited { retry_after: None })),
            );
        }
    }

    let h = harness(providers);
    let session = make_session(&h.store, SessionSettings::default());

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    // Three surviving analysts, 3*2 critiques.
    assert_eq!(result.analyses.len(), 3);
    assert_eq!(result.critiques.len(), 6);
    assert!(!result
        .metrics
        .agents_used
        .contains(&AgentId::AlternativesGenerator));
}

// ── S5: prose then strict-JSON recovery ────────────────────────────

#[tokio::test]
async fn s5_invalid_json_then_recovery_emits_extra_metric() {
    let mut providers = panel(vec![0.9]);
    for (agent, provider) in providers.iter_mut() {
        if *agent == AgentId::LogicalAnalyst {
            *provider = ScriptedProvider::new(
                "stub-openai",
                Box::new(|kind, index| match (kind, index) {
                    (CallKind::Analyze, 0) => Ok("Thinking out loud, no JSON here.".to_string()),
                    (CallKind::Analyze, _) => Ok(analysis_json(0.8)),
                    (CallKind::Critique, _) => Ok(critique_json(7.0)),
                    (CallKind::Synthesize, _) => Ok(synthesis_json(0.9)),
                }),
            );
        }
    }
    let logical = providers
        .iter()
        .find(|(agent, _)| *agent == AgentId::LogicalAnalyst)
        .unwrap()
        .1
        .clone();

    let h = harness(providers);
    let session = make_session(&h.store, SessionSettings::default());

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.analyses.len(), 4);

    // The strict reprompt carried the instruction and cost one extra call.
    let analyze_prompts = logical.prompts_of(CallKind::Analyze);
    assert_eq!(analyze_prompts.len(), 2);
    assert!(analyze_prompts[1].contains("strict JSON"));

    // Exactly one extra metric beyond the clean-run count: 4 analyses
    // + 12 critiques + 1 synthesis + 1 reprompt.
    let metrics = h.store.list_metrics(&session.id).unwrap();
    assert_eq!(metrics.len(), 18);
}

// ── S6: cancellation mid-critique ──────────────────────────────────

#[tokio::test]
async fn s6_cancellation_mid_critique_persists_partial_state() {
    let slow_critique = |name: &'static str| {
        ScriptedProvider::with_critique_delay(
            name,
            Duration::from_secs(30),
            default_responder(vec![0.9]),
        )
    };
    let h = harness(vec![
        (AgentId::LogicalAnalyst, slow_critique("stub-openai")),
        (AgentId::SystemsArchitect, slow_critique("stub-anthropic")),
    ]);
    let session = make_session(
        &h.store,
        SessionSettings {
            enabled_agents: vec![AgentId::LogicalAnalyst, AgentId::SystemsArchitect],
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let handle_token = cancel.clone();
    let store = h.store.clone();
    let session_id = session.id.clone();
    let engine = h.engine;

    let run = tokio::spawn(async move { engine.run(&session_id, cancel).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.list_analyses(&session.id).unwrap().len() == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "analyses never landed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle_token.cancel();

    let result = run.await.unwrap().unwrap();
    let error = result.error.as_ref().expect("expected cancellation");
    assert_eq!(error.reason, FailureReason::Cancelled);
    assert_eq!(result.analyses.len(), 2);
    assert!(result.synthesis.is_none());
    assert_eq!(
        store.load_session(&session.id).unwrap().status,
        SessionStatus::Cancelled
    );
}

// ── Boundary: single agent skips critiques ─────────────────────────

#[tokio::test]
async fn single_agent_session_skips_critiques() {
    let h = harness(vec![(
        AgentId::SystemsArchitect,
        ScriptedProvider::new("stub-anthropic", default_responder(vec![0.9])),
    )]);
    let session = make_session(
        &h.store,
        SessionSettings {
            enabled_agents: vec![AgentId::SystemsArchitect],
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.analyses.len(), 1);
    assert!(result.critiques.is_empty());
    assert!(result.synthesis.is_some());
}

// ── Boundary: all critiques fail, iteration proceeds ───────────────

#[tokio::test]
async fn all_critiques_failing_degrades_to_analyses_only() {
    let failing_critic = |name: &'static str| {
        ScriptedProvider::new(
            name,
            Box::new(|kind, _| match kind {
                CallKind::Critique => Err(ProviderError::InvalidRequest("refused".into())),
                CallKind::Analyze => Ok(analysis_json(0.8)),
                CallKind::Synthesize => Ok(synthesis_json(0.9)),
            }),
        )
    };
    let h = harness(vec![
        (AgentId::LogicalAnalyst, failing_critic("stub-openai")),
        (AgentId::SystemsArchitect, failing_critic("stub-anthropic")),
    ]);
    let session = make_session(
        &h.store,
        SessionSettings {
            enabled_agents: vec![AgentId::LogicalAnalyst, AgentId::SystemsArchitect],
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.analyses.len(), 2);
    assert!(result.critiques.is_empty());
    assert!(result.synthesis.is_some());
}

// ── Boundary: partial critique starvation fails the session ────────

#[tokio::test]
async fn partial_critique_starvation_fails_session() {
    // Three agents; only one critique call out of six succeeds, which is
    // below the N-1 floor.
    let one_good_critique = |name: &'static str, succeed_first: bool| {
        ScriptedProvider::new(
            name,
            Box::new(move |kind, index| match kind {
                CallKind::Critique if succeed_first && index == 0 => Ok(critique_json(7.0)),
                CallKind::Critique => Err(ProviderError::InvalidRequest("refused".into())),
                CallKind::Analyze => Ok(analysis_json(0.8)),
                CallKind::Synthesize => Ok(synthesis_json(0.9)),
            }),
        )
    };
    let h = harness(vec![
        (
            AgentId::LogicalAnalyst,
            one_good_critique("stub-openai", true),
        ),
        (
            AgentId::SystemsArchitect,
            one_good_critique("stub-anthropic", false),
        ),
        (
            AgentId::FormalAnalyst,
            one_good_critique("stub-deepseek", false),
        ),
    ]);
    let session = make_session(
        &h.store,
        SessionSettings {
            enabled_agents: vec![
                AgentId::LogicalAnalyst,
                AgentId::SystemsArchitect,
                AgentId::FormalAnalyst,
            ],
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    let error = result.error.as_ref().expect("expected starvation failure");
    assert_eq!(error.reason, FailureReason::TooFewCritiques);
    assert_eq!(
        h.store.load_session(&session.id).unwrap().status,
        SessionStatus::Failed
    );
}

// ── Boundary: max_iterations = 1 ───────────────────────────────────

#[tokio::test]
async fn max_iterations_one_terminates_regardless_of_consensus() {
    let h = harness(panel(vec![0.2]));
    let session = make_session(
        &h.store,
        SessionSettings {
            max_iterations: 1,
            consensus_threshold: 0.9,
            budget_usd: 10.0,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.metrics.iterations_used, 1);
    assert_eq!(
        h.store.load_session(&session.id).unwrap().status,
        SessionStatus::Completed
    );
}

// ── Idempotence: rerunning a completed session is a no-op ──────────

#[tokio::test]
async fn rerunning_completed_session_returns_same_result_without_calls() {
    let providers = panel(vec![0.9]);
    let logical = providers
        .iter()
        .find(|(agent, _)| *agent == AgentId::LogicalAnalyst)
        .unwrap()
        .1
        .clone();

    let h = harness(providers);
    let session = make_session(&h.store, SessionSettings::default());

    let first = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = logical.calls();

    let second = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(logical.calls(), calls_after_first);
    assert_eq!(first.session_id, second.session_id);
    assert_eq!(
        first.metrics.total_cost_usd,
        second.metrics.total_cost_usd
    );
    assert_eq!(
        first.synthesis.as_ref().unwrap().summary,
        second.synthesis.as_ref().unwrap().summary
    );
}

// ── Invariants over a full run ─────────────────────────────────────

#[tokio::test]
async fn run_invariants_hold() {
    let h = harness(panel(vec![0.7, 0.85]));
    let session = make_session(
        &h.store,
        SessionSettings {
            budget_usd: 10.0,
            ..Default::default()
        },
    );

    let result = h
        .engine
        .run(&session.id, CancellationToken::new())
        .await
        .unwrap();
    assert!(result.error.is_none());

    for analysis in &result.analyses {
        assert!((0.0..=1.0).contains(&analysis.confidence));
        assert!(session
            .settings
            .enabled_agents
            .contains(&analysis.agent));
    }
    for critique in &result.critiques {
        assert_ne!(critique.from_agent, critique.to_agent);
        assert!((0.0..=10.0).contains(&critique.score));
    }
    assert!(result.metrics.iterations_used <= session.settings.max_iterations);

    let metrics = h.store.list_metrics(&session.id).unwrap();
    let spent: f64 = metrics.iter().map(|m| m.cost_usd).sum();
    assert!(spent <= session.settings.budget_usd);
    assert!((result.metrics.total_cost_usd - spent).abs() < 1e-9);

    // One synthesis per iteration actually run.
    assert_eq!(
        h.store.list_syntheses(&session.id).unwrap().len() as u32,
        result.metrics.iterations_used
    );
}

// ── Events: lifecycle stream shape ─────────────────────────────────

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let h = harness(panel(vec![0.9]));
    let session = make_session(&h.store, SessionSettings::default());

    let mut receiver = h.bus.subscribe_session(&session.id);
    let engine = h.engine;
    let session_id = session.id.clone();
    let run = tokio::spawn(async move { engine.run(&session_id, CancellationToken::new()).await });

    let mut kinds = Vec::new();
    while let Some(event) = receiver.recv().await {
        let terminal = event.is_terminal();
        kinds.push(event.event_type());
        if terminal {
            break;
        }
    }
    run.await.unwrap().unwrap();

    assert_eq!(kinds.first().copied(), Some("phase_started"));
    assert!(kinds.contains(&"agent_completed"));
    assert!(kinds.contains(&"critique_completed"));
    assert!(kinds.contains(&"synthesis_ready"));
    assert!(kinds.contains(&"iteration_completed"));
    assert_eq!(kinds.last().copied(), Some("session_completed"));

    // phase_started(analyze) precedes every critique completion.
    let first_critique = kinds.iter().position(|k| *k == "critique_completed");
    let first_phase = kinds.iter().position(|k| *k == "phase_started");
    assert!(first_phase < first_critique);
}
