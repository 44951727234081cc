//! Deterministic core of the Conclave multi-agent deliberation engine.
//!
//! This crate is LLM-free by design: no network I/O anywhere. It holds
//! the domain records, the session phase machine, the consensus
//! evaluator, the structured output parser, cost accounting, prompt
//! templates, the session store, and the event bus. Everything that
//! talks to model providers lives in `conclave-agents`.

pub mod consensus;
pub mod cost;
pub mod events;
pub mod parser;
pub mod prompts;
pub mod session;
pub mod store;

pub use consensus::{
    calls_per_iteration, ConsensusEvaluator, EvaluationDecision, EvaluationInputs,
    IterationSnapshot, StopReason,
};
pub use cost::{avg_call_cost, session_totals, ModelPricing, PriceTable, UsageTotals};
pub use events::{EventBus, SessionEvent, SharedEventBus};
pub use parser::{extract_json, parse_phase, ParseError, PhaseOutput};
pub use prompts::{PromptStore, PromptTemplate, PromptType, PromptVars};
pub use session::records::{
    AgentAnalysis, AggregateMetrics, CallStatus, Conclusion, Critique, FailureReason, FinalResult,
    Phase, RunMetric, Synthesis, TerminationError,
};
pub use session::{
    AgentId, Session, SessionPhase, SessionProgress, SessionSettings, SessionStatus, TaskType,
};
pub use store::{memory::MemoryStore, rocks::RocksStore, SessionStore, SharedSessionStore,
    StoreError, StoreSource,
};
