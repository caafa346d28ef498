use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ControlError, Result};

/// Status shared by every stateful entity (jobs and cases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Stopped,
    InProgress,
    Awaiting,
    Completed,
    Failed,
    Cancelled,
    Cancelling,
}

impl EntityStatus {
    pub const ALL: [EntityStatus; 7] = [
        EntityStatus::Stopped,
        EntityStatus::InProgress,
        EntityStatus::Awaiting,
        EntityStatus::Completed,
        EntityStatus::Failed,
        EntityStatus::Cancelled,
        EntityStatus::Cancelling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Stopped => "stopped",
            EntityStatus::InProgress => "in_progress",
            EntityStatus::Awaiting => "awaiting",
            EntityStatus::Completed => "completed",
            EntityStatus::Failed => "failed",
            EntityStatus::Cancelled => "cancelled",
            EntityStatus::Cancelling => "cancelling",
        }
    }

    /// No outgoing transitions exist from these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityStatus::Completed | EntityStatus::Failed | EntityStatus::Cancelled
        )
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, EntityStatus::Stopped) || self.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            EntityStatus::InProgress | EntityStatus::Cancelling | EntityStatus::Awaiting
        )
    }

    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            EntityStatus::Cancelling | EntityStatus::Failed | EntityStatus::Cancelled
        )
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triggers that move an entity between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityEvent {
    StartWork,
    InputRequested,
    InputReceived,
    SuccessfullyDone,
    FailedEvent,
    CancelRequested,
    CancelledEvent,
}

impl EntityEvent {
    pub const ALL: [EntityEvent; 7] = [
        EntityEvent::StartWork,
        EntityEvent::InputRequested,
        EntityEvent::InputReceived,
        EntityEvent::SuccessfullyDone,
        EntityEvent::FailedEvent,
        EntityEvent::CancelRequested,
        EntityEvent::CancelledEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityEvent::StartWork => "start_work",
            EntityEvent::InputRequested => "input_requested",
            EntityEvent::InputReceived => "input_received",
            EntityEvent::SuccessfullyDone => "successfully_done",
            EntityEvent::FailedEvent => "failed_event",
            EntityEvent::CancelRequested => "cancel_requested",
            EntityEvent::CancelledEvent => "cancelled_event",
        }
    }

    /// Human readable label used in rendered diagrams.
    pub fn label(&self) -> &'static str {
        match self {
            EntityEvent::StartWork => "Start work",
            EntityEvent::InputRequested => "Input requested",
            EntityEvent::InputReceived => "Input received",
            EntityEvent::SuccessfullyDone => "Successfully done",
            EntityEvent::FailedEvent => "Error encountered",
            EntityEvent::CancelRequested => "Cancel requested",
            EntityEvent::CancelledEvent => "Cancel confirmed",
        }
    }
}

impl fmt::Display for EntityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: EntityStatus,
    pub event: EntityEvent,
    pub to: EntityStatus,
}

const fn edge(from: EntityStatus, event: EntityEvent, to: EntityStatus) -> Transition {
    Transition { from, event, to }
}

/// The complete transition table. Any pair absent from it is rejected.
pub const TRANSITIONS: [Transition; 7] = [
    edge(EntityStatus::Stopped, EntityEvent::StartWork, EntityStatus::InProgress),
    edge(EntityStatus::InProgress, EntityEvent::InputRequested, EntityStatus::Awaiting),
    edge(EntityStatus::Awaiting, EntityEvent::InputReceived, EntityStatus::InProgress),
    edge(EntityStatus::InProgress, EntityEvent::SuccessfullyDone, EntityStatus::Completed),
    edge(EntityStatus::InProgress, EntityEvent::FailedEvent, EntityStatus::Failed),
    edge(EntityStatus::InProgress, EntityEvent::CancelRequested, EntityStatus::Cancelling),
    edge(EntityStatus::Cancelling, EntityEvent::CancelledEvent, EntityStatus::Cancelled),
];

/// Anything whose status the lifecycle engine may drive.
pub trait Stateful {
    fn status(&self) -> EntityStatus;
    fn set_status(&mut self, status: EntityStatus);

    /// Identifier used only for log context.
    fn entity_ref(&self) -> String;
}

/// Evaluates events against [`TRANSITIONS`].
pub struct Lifecycle;

impl Lifecycle {
    /// Target status for `event` from `from`, if the table allows it.
    pub fn target(from: EntityStatus, event: EntityEvent) -> Option<EntityStatus> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.event == event)
            .map(|t| t.to)
    }

    /// Apply `event` to the entity, mutating its status in place.
    ///
    /// Returns the status the entity had before the transition. The entity is
    /// left untouched when the pair is not in the table.
    pub fn apply<E: Stateful + ?Sized>(entity: &mut E, event: EntityEvent) -> Result<EntityStatus> {
        let from = entity.status();
        let to = Self::target(from, event).ok_or(ControlError::Transition { from, event })?;
        entity.set_status(to);
        debug!(entity = %entity.entity_ref(), %from, %event, %to, "lifecycle transition");
        Ok(from)
    }

    pub fn valid_transitions(from: EntityStatus) -> Vec<EntityStatus> {
        TRANSITIONS
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }

    pub fn can_transition(from: EntityStatus, to: EntityStatus) -> bool {
        Self::transition_event(from, to).is_some()
    }

    /// The event that moves `from` to `to`, if any.
    pub fn transition_event(from: EntityStatus, to: EntityStatus) -> Option<EntityEvent> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.to == to)
            .map(|t| t.event)
    }

    pub fn terminal_states() -> Vec<EntityStatus> {
        EntityStatus::ALL
            .into_iter()
            .filter(|s| Self::valid_transitions(*s).is_empty())
            .collect()
    }

    /// Statuses no transition leads into.
    pub fn start_states() -> Vec<EntityStatus> {
        EntityStatus::ALL
            .into_iter()
            .filter(|s| !TRANSITIONS.iter().any(|t| t.to == *s))
            .collect()
    }

    /// Render the table as a Mermaid `stateDiagram-v2` block.
    pub fn mermaid_diagram() -> String {
        let mut lines = vec!["```mermaid".to_string(), "stateDiagram-v2".to_string()];
        for start in Self::start_states() {
            lines.push(format!("    [*] --> {start}"));
        }
        for t in TRANSITIONS.iter() {
            lines.push(format!("    {} --> {} : {}", t.from, t.to, t.event.label()));
        }
        for terminal in Self::terminal_states() {
            lines.push(format!("    {terminal} --> [*]"));
        }
        lines.push("```".to_string());
        lines.join("\n")
    }
}
