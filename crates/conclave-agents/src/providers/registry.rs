//! Binds the four agent personas to provider adapters and default models,
//! and enforces the per-provider in-flight cap.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use deliberation::AgentId;

use crate::config::EngineConfig;

use super::{anthropic::AnthropicProvider, gemini::GeminiProvider, openai::OpenAiProvider};
use super::ChatProvider;

/// One agent's provider binding.
#[derive(Clone)]
pub struct AgentBinding {
    pub agent: AgentId,
    pub provider: Arc<dyn ChatProvider>,
    pub default_model: String,
}

/// Agent listing entry for `/agents` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent: AgentId,
    pub role: String,
    pub description: String,
    pub provider: String,
    pub default_model: String,
    pub enabled: bool,
}

/// Registry of agent bindings plus per-provider concurrency limits.
pub struct ProviderRegistry {
    bindings: HashMap<AgentId, AgentBinding>,
    limits: HashMap<&'static str, Arc<Semaphore>>,
}

impl ProviderRegistry {
    /// Build the default four-agent registry from configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let openai: Arc<dyn ChatProvider> = Arc::new(OpenAiProvider::new(
            "openai",
            &config.openai.base_url,
            &config.openai.api_key,
        ));
        let anthropic: Arc<dyn ChatProvider> = Arc::new(AnthropicProvider::new(
            &config.anthropic.base_url,
            &config.anthropic.api_key,
        ));
        let gemini: Arc<dyn ChatProvider> = Arc::new(GeminiProvider::new(
            &config.gemini.base_url,
            &config.gemini.api_key,
        ));
        // DeepSeek speaks the OpenAI wire format.
        let deepseek: Arc<dyn ChatProvider> = Arc::new(OpenAiProvider::new(
            "deepseek",
            &config.deepseek.base_url,
            &config.deepseek.api_key,
        ));

        let bindings = [
            (AgentId::LogicalAnalyst, openai, "gpt-4o"),
            (
                AgentId::SystemsArchitect,
                anthropic,
                "claude-3-sonnet-20240229",
            ),
            (AgentId::AlternativesGenerator, gemini, "gemini-1.5-pro"),
            (AgentId::FormalAnalyst, deepseek, "deepseek-chat"),
        ];

        Self::from_bindings(
            bindings
                .into_iter()
                .map(|(agent, provider, model)| AgentBinding {
                    agent,
                    provider,
                    default_model: model.to_string(),
                })
                .collect(),
            config.max_in_flight_per_provider,
        )
    }

    /// Build from explicit bindings (tests inject scripted providers here).
    pub fn from_bindings(bindings: Vec<AgentBinding>, max_in_flight: usize) -> Self {
        let mut limits: HashMap<&'static str, Arc<Semaphore>> = HashMap::new();
        for binding in &bindings {
            limits
                .entry(binding.provider.name())
                .or_insert_with(|| Arc::new(Semaphore::new(max_in_flight)));
        }
        Self {
            bindings: bindings.into_iter().map(|b| (b.agent, b)).collect(),
            limits,
        }
    }

    pub fn binding(&self, agent: AgentId) -> Option<&AgentBinding> {
        self.bindings.get(&agent)
    }

    /// Model for `agent`, honoring a per-session override.
    pub fn model_for(&self, agent: AgentId, override_model: Option<&str>) -> Option<String> {
        let binding = self.binding(agent)?;
        Some(
            override_model
                .map(|m| m.to_string())
                .unwrap_or_else(|| binding.default_model.clone()),
        )
    }

    /// Acquire an in-flight slot for the agent's provider.
    pub async fn acquire(&self, agent: AgentId) -> Option<OwnedSemaphorePermit> {
        let binding = self.binding(agent)?;
        let semaphore = self.limits.get(binding.provider.name())?.clone();
        semaphore.acquire_owned().await.ok()
    }

    /// Listing for the HTTP surface, flagged by session enablement.
    pub fn agent_infos(&self, enabled: &[AgentId]) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .bindings
            .values()
            .map(|b| AgentInfo {
                agent: b.agent,
                role: b.agent.role_title().to_string(),
                description: b.agent.description().to_string(),
                provider: b.provider.name().to_string(),
                default_model: b.default_model.clone(),
                enabled: enabled.contains(&b.agent),
            })
            .collect();
        infos.sort_by_key(|i| i.agent.as_str());
        infos
    }

    /// Reachability per provider, for `/health`.
    pub async fn provider_health(&self) -> HashMap<String, bool> {
        let mut health = HashMap::new();
        for binding in self.bindings.values() {
            let name = binding.provider.name().to_string();
            if health.contains_key(&name) {
                continue;
            }
            health.insert(name, binding.provider.is_available().await);
        }
        health
    }
}
