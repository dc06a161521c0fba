//! The event bus: a typed, multi-subscriber broadcast of [`AgentEvent`]s
//! from the executor to any number of observers (UI, logging, tests).
//!
//! Each `subscribe()` call gets its own bounded queue (default 100) so one
//! slow subscriber can never block publish for the others.
//! `tokio::sync::broadcast` is deliberately not used here — it drops the
//! *oldest* event crate-wide on overflow, whereas a full queue here should
//! only drop that one subscriber's subscription, not data for survivors.

use crate::types::{
    ActionClassification, ApprovalResult, AuditEntry, Plan, PlanStep, SessionState, ToolCall,
    ToolDefinition, ToolResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// The event types published over the course of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    StateChange { from: SessionState, to: SessionState },
    PlanCreated { plan: Plan },
    StepStarted { step: PlanStep },
    StepCompleted { step: PlanStep },
    ToolCalled { call: ToolCall },
    ToolResultEvent { result: ToolResult },
    ActionClassified { classification: ActionClassification },
    ApprovalRequested { request_id: String, classification: ActionClassification, step_id: String },
    ApprovalReceived { result: ApprovalResult },
    KillSwitchTriggered { reason: String },
    BudgetExceeded,
    Error { message: String },
    Completed { answer: String },
    Cancelled { reason: String },
}

impl EventPayload {
    /// Terminal event types close a subscription once delivered & drained.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Completed { .. } | EventPayload::Cancelled { .. } | EventPayload::Error { .. }
        )
    }
}

/// A single event on the bus — payload plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub session_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: EventPayload,
}

impl AgentEvent {
    pub fn new(session_id: impl Into<String>, data: EventPayload) -> Self {
        Self { session_id: session_id.into(), timestamp: chrono::Utc::now(), data }
    }
}

/// Bound on each subscriber's queue. A subscriber that cannot keep up is
/// dropped rather than allowed to backpressure the producer.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

struct Subscriber {
    tx: mpsc::Sender<AgentEvent>,
    closed: bool,
}

/// One producer (the executor), N subscribers. Publishing never blocks:
/// a full subscriber queue is dropped with a warning, never the producer.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { subscribers: Mutex::new(Vec::new()), capacity }
    }

    /// Registers a new subscriber and returns its receiving half. The
    /// subscription auto-closes (the sender is dropped) once a terminal
    /// event has been pushed into its queue, or when the caller drops
    /// the receiver.
    pub fn subscribe(&self) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().unwrap().push(Subscriber { tx, closed: false });
        rx
    }

    /// Publish one event to every live subscriber. Non-blocking: uses
    /// `try_send`, so a subscriber whose queue is full is dropped from
    /// the list instead of stalling this call.
    pub fn publish(&self, event: AgentEvent) {
        let terminal = event.data.is_terminal();
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain_mut(|sub| {
            if sub.closed {
                return false;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {
                    if terminal {
                        sub.closed = true;
                    }
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("event subscriber queue full — dropping subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of currently live subscribers — used in tests and for
    /// observability ("is anyone listening").
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().iter().filter(|s| !s.closed).count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper used by callers who just want an `AgentEvent`
/// builder keyed to one session (the executor's own use pattern).
pub struct SessionEmitter<'a> {
    bus: &'a EventBus,
    session_id: String,
}

impl<'a> SessionEmitter<'a> {
    pub fn new(bus: &'a EventBus, session_id: impl Into<String>) -> Self {
        Self { bus, session_id: session_id.into() }
    }

    pub fn emit(&self, data: EventPayload) {
        self.bus.publish(AgentEvent::new(self.session_id.clone(), data));
    }
}

// Kept for the tool-definition conversions used when publishing
// `plan_created` alongside the tool catalog in the planner's own logs.
pub fn describe_tools(defs: &[ToolDefinition]) -> String {
    defs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
}
