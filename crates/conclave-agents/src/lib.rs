//! Provider adapters, agent runner, deliberation engine, and HTTP facade
//! for the Conclave multi-agent deliberation system.
//!
//! The deterministic domain core lives in the `deliberation` crate; this
//! crate is everything that touches the network: outbound model calls
//! and the inbound HTTP surface.

pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod providers;
pub mod runner;
pub mod server;
pub mod studio;

pub use config::EngineConfig;
pub use engine::{DeliberationEngine, EngineError};
pub use error::{AgentCallError, RetryCategory};
pub use providers::{AgentBinding, CallParams, ChatProvider, Completion, ProviderError, ProviderRegistry};
pub use runner::{AgentRunner, CallSpec};
