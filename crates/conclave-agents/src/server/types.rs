//! Request/response bodies for the HTTP surface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use deliberation::{
    AgentId, FinalResult, PromptTemplate, SessionSettings, SessionStatus, StoreSource, TaskType,
};

use crate::providers::registry::AgentInfo;

/// Body for `POST /analyze` and `POST /analyze/async`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub task: String,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub enabled_agents: Option<Vec<String>>,
    #[serde(default)]
    pub models: Option<HashMap<String, String>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub consensus_threshold: Option<f64>,
    #[serde(default)]
    pub budget_usd: Option<f64>,
}

impl AnalyzeRequest {
    /// Resolve the request into task fields plus validated settings.
    pub fn resolve(&self) -> Result<(String, TaskType, Option<String>, SessionSettings), String> {
        if self.task.trim().is_empty() {
            return Err("task must be non-empty".to_string());
        }
        let task_type = match self.task_type.as_deref() {
            None => TaskType::Research,
            Some(s) => TaskType::parse(s).ok_or_else(|| format!("unknown task_type '{}'", s))?,
        };

        let mut settings = SessionSettings::default();
        if let Some(names) = &self.enabled_agents {
            let mut agents = Vec::new();
            for name in names {
                agents.push(
                    AgentId::parse(name).ok_or_else(|| format!("unknown agent '{}'", name))?,
                );
            }
            settings.enabled_agents = agents;
        }
        if let Some(models) = &self.models {
            for (name, model) in models {
                let agent =
                    AgentId::parse(name).ok_or_else(|| format!("unknown agent '{}'", name))?;
                settings.models.insert(agent, model.clone());
            }
        }
        if let Some(t) = self.temperature {
            settings.temperature = t;
        }
        if let Some(m) = self.max_iterations {
            settings.max_iterations = m;
        }
        if let Some(c) = self.consensus_threshold {
            settings.consensus_threshold = c;
        }
        if let Some(b) = self.budget_usd {
            settings.budget_usd = b;
        }
        settings.validate()?;

        Ok((
            self.task.clone(),
            task_type,
            self.context.clone(),
            settings,
        ))
    }
}

/// Response for `POST /analyze/async`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSubmitted {
    pub task_id: String,
    pub status: SessionStatus,
}

/// Response for `GET /tasks/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusResponse {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FinalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: StoreSource,
}

/// Coarse progress for a running session.
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub analyses_recorded: usize,
    pub critiques_recorded: usize,
    pub iterations_completed: usize,
}

/// Response for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agents: Vec<AgentInfo>,
    pub providers: HashMap<String, bool>,
    pub source: StoreSource,
    pub active_sessions: usize,
}

/// Uniform error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Body for `POST /studio/prompts`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptUpsertRequest {
    pub agent: String,
    pub prompt_type: String,
    pub content: String,
}

/// Body for `PUT /studio/prompts`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptActivateRequest {
    pub agent: String,
    pub prompt_type: String,
    pub version: u32,
}

/// Response for `GET /studio/prompts`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptListResponse {
    pub templates: Vec<PromptTemplate>,
}

/// Body for `POST /studio/experiments`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateExperimentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent: String,
    pub prompt_type: String,
    #[serde(default)]
    pub variants: Vec<VariantSpec>,
}

/// Candidate content inside an experiment-creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantSpec {
    pub label: String,
    pub content: String,
}

/// Body for `PUT /studio/experiments/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateExperimentRequest {
    pub status: String,
}
