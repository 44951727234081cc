//! Session lifecycle events over a broadcast bus.
//!
//! Lifecycle events are lossless for a live subscriber; `metric` events
//! are marked lossy and may be dropped when a subscriber lags. Nothing
//! is persisted across reconnects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::records::{FailureReason, Phase, RunMetric};
use crate::session::AgentId;

/// Channel capacity for the broadcast bus.
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to send event: {0}")]
    SendFailed(String),
}

/// Shared reference to an EventBus.
pub type SharedEventBus = Arc<EventBus>;

/// One lifecycle event in a session's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum SessionEvent {
    PhaseStarted {
        session_id: String,
        phase: Phase,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    AgentCompleted {
        session_id: String,
        agent: AgentId,
        phase: Phase,
        iteration: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    CritiqueCompleted {
        session_id: String,
        iteration: u32,
        from_agent: AgentId,
        to_agent: AgentId,
        timestamp: DateTime<Utc>,
    },
    SynthesisReady {
        session_id: String,
        iteration: u32,
        consensus_level: f64,
        timestamp: DateTime<Utc>,
    },
    IterationCompleted {
        session_id: String,
        iteration: u32,
        decision: String,
        /// Critique-derived cross-check; informational only.
        critique_consensus_estimate: f64,
        timestamp: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        iterations_used: u32,
        timestamp: DateTime<Utc>,
    },
    SessionFailed {
        session_id: String,
        reason: FailureReason,
        message: String,
        timestamp: DateTime<Utc>,
    },
    SessionCancelled {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    Metric {
        metric: RunMetric,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseStarted { .. } => "phase_started",
            Self::AgentCompleted { .. } => "agent_completed",
            Self::CritiqueCompleted { .. } => "critique_completed",
            Self::SynthesisReady { .. } => "synthesis_ready",
            Self::IterationCompleted { .. } => "iteration_completed",
            Self::SessionCompleted { .. } => "session_completed",
            Self::SessionFailed { .. } => "session_failed",
            Self::SessionCancelled { .. } => "session_cancelled",
            Self::Metric { .. } => "metric",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::PhaseStarted { session_id, .. }
            | Self::AgentCompleted { session_id, .. }
            | Self::CritiqueCompleted { session_id, .. }
            | Self::SynthesisReady { session_id, .. }
            | Self::IterationCompleted { session_id, .. }
            | Self::SessionCompleted { session_id, .. }
            | Self::SessionFailed { session_id, .. }
            | Self::SessionCancelled { session_id, .. } => session_id,
            Self::Metric { metric, .. } => &metric.session_id,
        }
    }

    /// Whether the event ends its session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionCompleted { .. }
                | Self::SessionFailed { .. }
                | Self::SessionCancelled { .. }
        )
    }

    /// Lossy events may be dropped under subscriber back-pressure.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Metric { .. })
    }
}

/// Broadcast-based event bus.
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event. A bus with no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(event_type, receivers, "event published");
            }
            Err(_) => {
                tracing::debug!(event_type, "event published (no receivers)");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a single session's events.
    pub fn subscribe_session(&self, session_id: &str) -> SessionReceiver {
        SessionReceiver {
            receiver: self.sender.subscribe(),
            session_id: session_id.to_string(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver yielding only one session's events. Lagged (dropped) events
/// are skipped silently; they are lossy by contract.
pub struct SessionReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    session_id: String,
}

impl SessionReceiver {
    /// Next event for this session, or `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id() == self.session_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        session = %self.session_id,
                        skipped,
                        "subscriber lagged, events dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(session_id: &str) -> SessionEvent {
        SessionEvent::SessionCompleted {
            session_id: session_id.to_string(),
            iterations_used: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::PhaseStarted {
            session_id: "s-1".into(),
            phase: Phase::Analyze,
            iteration: 1,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "phase_started");
        assert_eq!(event.session_id(), "s-1");
    }

    #[tokio::test]
    async fn test_session_filter() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_session("wanted");

        bus.publish(completed("other"));
        bus.publish(completed("wanted"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "wanted");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_events() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(completed("s-1"));

        assert_eq!(rx1.recv().await.unwrap().session_id(), "s-1");
        assert_eq!(rx2.recv().await.unwrap().session_id(), "s-1");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(completed("s-1"));
    }

    #[test]
    fn test_terminal_and_lossy_classification() {
        assert!(completed("s").is_terminal());
        let failed = SessionEvent::SessionFailed {
            session_id: "s".into(),
            reason: FailureReason::BudgetExhausted,
            message: "out of funds".into(),
            timestamp: Utc::now(),
        };
        assert!(failed.is_terminal());
        assert!(!failed.is_lossy());

        let metric_event = SessionEvent::Metric {
            metric: RunMetric {
                session_id: "s".into(),
                agent: AgentId::LogicalAnalyst,
                model: "gpt-4o".into(),
                phase: Phase::Analyze,
                tokens_in: 1,
                tokens_out: 1,
                cost_usd: 0.0,
                latency_ms: 1,
                status: crate::session::records::CallStatus::Success,
                error_message: None,
                created_at: Utc::now(),
            },
            timestamp: Utc::now(),
        };
        assert!(metric_event.is_lossy());
        assert!(!metric_event.is_terminal());
        assert_eq!(metric_event.session_id(), "s");
    }

    #[test]
    fn test_event_serde_tagging() {
        let json = serde_json::to_string(&completed("s-1")).unwrap();
        assert!(json.contains("\"event\":\"session_completed\""));
    }
}
