//! Versioned prompt templates with a read-mostly resolver cache.
//!
//! At most one template is active per `(agent, prompt_type)`. Resolution
//! falls back to the builtin persona defaults when nothing has been
//! stored. Updates invalidate the cache; readers never block writers for
//! long (single-writer invalidation over an `RwLock`).

pub mod builtin;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::AgentId;

/// The four template kinds the runner composes calls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    System,
    UserTemplate,
    Critique,
    Synthesis,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::UserTemplate => "user_template",
            Self::Critique => "critique",
            Self::Synthesis => "synthesis",
        }
    }

    pub fn parse(s: &str) -> Option<PromptType> {
        match s {
            "system" => Some(Self::System),
            "user_template" => Some(Self::UserTemplate),
            "critique" => Some(Self::Critique),
            "synthesis" => Some(Self::Synthesis),
            _ => None,
        }
    }
}

impl std::fmt::Display for PromptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored prompt template version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub agent: AgentId,
    pub prompt_type: PromptType,
    pub version: u32,
    pub content: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Persistence hook so templates survive restarts when a database store
/// is configured. Memory mode leaves this unset and stays ephemeral.
pub trait PromptPersistence: Send + Sync {
    fn persist_template(&self, template: &PromptTemplate) -> Result<(), String>;
    fn load_templates(&self) -> Result<Vec<PromptTemplate>, String>;
}

type TemplateKey = (AgentId, PromptType);

/// Prompt store: version history per key, active-content cache, builtin
/// fallback.
pub struct PromptStore {
    history: RwLock<HashMap<TemplateKey, Vec<PromptTemplate>>>,
    cache: RwLock<HashMap<TemplateKey, String>>,
    persistence: Option<Arc<dyn PromptPersistence>>,
}

impl PromptStore {
    pub fn new() -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            persistence: None,
        }
    }

    /// Attach persistence and load any previously stored templates.
    pub fn with_persistence(persistence: Arc<dyn PromptPersistence>) -> Result<Self, String> {
        let store = Self {
            history: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            persistence: Some(persistence.clone()),
        };
        for template in persistence.load_templates()? {
            let mut history = store.history.write().expect("prompt lock poisoned");
            let versions = history
                .entry((template.agent, template.prompt_type))
                .or_default();
            versions.push(template);
            versions.sort_by_key(|t| t.version);
        }
        Ok(store)
    }

    /// Resolve the active content for `(agent, prompt_type)`, reading
    /// through the cache and falling back to the builtin default.
    pub fn resolve(&self, agent: AgentId, prompt_type: PromptType) -> String {
        let key = (agent, prompt_type);
        if let Some(content) = self.cache.read().expect("prompt lock poisoned").get(&key) {
            return content.clone();
        }

        let resolved = {
            let history = self.history.read().expect("prompt lock poisoned");
            history
                .get(&key)
                .and_then(|versions| versions.iter().rev().find(|t| t.is_active))
                .map(|t| t.content.clone())
        }
        .unwrap_or_else(|| builtin::default_content(agent, prompt_type).to_string());

        self.cache
            .write()
            .expect("prompt lock poisoned")
            .insert(key, resolved.clone());
        resolved
    }

    /// Store a new version as the active template, deactivating prior
    /// versions and invalidating the cache.
    pub fn upsert(
        &self,
        agent: AgentId,
        prompt_type: PromptType,
        content: &str,
    ) -> Result<PromptTemplate, String> {
        if content.trim().is_empty() {
            return Err("template content must be non-empty".to_string());
        }
        let key = (agent, prompt_type);
        let template = {
            let mut history = self.history.write().expect("prompt lock poisoned");
            let versions = history.entry(key).or_default();
            for old in versions.iter_mut() {
                old.is_active = false;
            }
            let template = PromptTemplate {
                agent,
                prompt_type,
                version: versions.last().map(|t| t.version + 1).unwrap_or(1),
                content: content.to_string(),
                is_active: true,
                created_at: Utc::now(),
            };
            versions.push(template.clone());
            template
        };

        self.cache
            .write()
            .expect("prompt lock poisoned")
            .remove(&key);

        if let Some(persistence) = &self.persistence {
            persistence.persist_template(&template)?;
        }
        Ok(template)
    }

    /// Activate a specific stored version.
    pub fn activate(
        &self,
        agent: AgentId,
        prompt_type: PromptType,
        version: u32,
    ) -> Result<(), String> {
        let key = (agent, prompt_type);
        {
            let mut history = self.history.write().expect("prompt lock poisoned");
            let versions = history
                .get_mut(&key)
                .ok_or_else(|| format!("no templates for {}/{}", agent, prompt_type))?;
            if !versions.iter().any(|t| t.version == version) {
                return Err(format!("version {} not found", version));
            }
            for t in versions.iter_mut() {
                t.is_active = t.version == version;
            }
        }
        self.cache
            .write()
            .expect("prompt lock poisoned")
            .remove(&key);
        Ok(())
    }

    /// All stored templates, active and inactive.
    pub fn list(&self) -> Vec<PromptTemplate> {
        let history = self.history.read().expect("prompt lock poisoned");
        let mut all: Vec<PromptTemplate> = history.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            a.agent
                .as_str()
                .cmp(b.agent.as_str())
                .then(a.prompt_type.as_str().cmp(b.prompt_type.as_str()))
                .then(a.version.cmp(&b.version))
        });
        all
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("prompt lock poisoned").clear();
    }
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Variables available to template interpolation.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    vars: Vec<(&'static str, String)>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.vars.push((name, value.into()));
        self
    }

    /// Replace every `{name}` placeholder with its value. Unknown
    /// placeholders are left untouched.
    pub fn apply(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (name, value) in &self.vars {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}
