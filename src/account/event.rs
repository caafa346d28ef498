use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::server::Server;
use crate::state_machine::{Case, CaseNodeUpdate, Job};

/// Categories of events sent to the account, with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "agent.register")]
    AgentRegister,
    #[serde(rename = "server.register")]
    ServerRegister,
    #[serde(rename = "agent.wakeup")]
    AgentWakeup,
    #[serde(rename = "agent.anomaly")]
    AgentAnomaly,
    #[serde(rename = "agent.intermediary")]
    Intermediary,
    #[serde(rename = "agent.job.start.confirmation")]
    JobStartConfirmation,
    #[serde(rename = "agent.job.finished")]
    JobFinished,
    #[serde(rename = "agent.job.status")]
    JobStatus,
    #[serde(rename = "agent.job.result")]
    JobResult,
    #[serde(rename = "agent.job.error")]
    JobError,
    #[serde(rename = "agent.case.start")]
    CaseStart,
    #[serde(rename = "agent.case.end")]
    CaseEnd,
    #[serde(rename = "agent.case.status")]
    CaseStatus,
    #[serde(rename = "agent.case.result")]
    CaseResult,
    #[serde(rename = "agent.case.update")]
    CaseUpdate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegister => "agent.register",
            EventType::ServerRegister => "server.register",
            EventType::AgentWakeup => "agent.wakeup",
            EventType::AgentAnomaly => "agent.anomaly",
            EventType::Intermediary => "agent.intermediary",
            EventType::JobStartConfirmation => "agent.job.start.confirmation",
            EventType::JobFinished => "agent.job.finished",
            EventType::JobStatus => "agent.job.status",
            EventType::JobResult => "agent.job.result",
            EventType::JobError => "agent.job.error",
            EventType::CaseStart => "agent.case.start",
            EventType::CaseEnd => "agent.case.end",
            EventType::CaseStatus => "agent.case.status",
            EventType::CaseResult => "agent.case.result",
            EventType::CaseUpdate => "agent.case.update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub source: String,
    pub details: Value,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, details: Value) -> Self {
        Self {
            event_type,
            source: source.into(),
            details,
        }
    }

    pub fn job_start_confirmation(job: &Job) -> serde_json::Result<Self> {
        Ok(Self::new(EventType::JobStartConfirmation, &job.id, serde_json::to_value(job)?))
    }

    pub fn job_finished(job: &Job) -> serde_json::Result<Self> {
        Ok(Self::new(EventType::JobFinished, &job.id, serde_json::to_value(job)?))
    }

    pub fn case_start(case: &Case) -> serde_json::Result<Self> {
        Ok(Self::new(EventType::CaseStart, case.uri(), serde_json::to_value(case)?))
    }

    pub fn case_update(case: &Case, update: &CaseNodeUpdate) -> serde_json::Result<Self> {
        Ok(Self::new(EventType::CaseUpdate, case.uri(), serde_json::to_value(update)?))
    }

    pub fn agent_register(agent: &Agent, polling: bool) -> Self {
        let mut details = agent.registration_info();
        if let Value::Object(map) = &mut details {
            map.insert("polling".into(), Value::Bool(polling));
        }
        Self::new(EventType::AgentRegister, agent.path(), details)
    }

    pub fn server_register(server: &Server) -> Self {
        Self::new(EventType::ServerRegister, server.uri(), server.registration_info())
    }

    /// Body sent to the account for this event.
    pub fn payload(&self, workspace: &str) -> Value {
        serde_json::json!({
            "source": self.source,
            "workspace": workspace,
            "event_type": self.event_type,
            "details": self.details,
        })
    }
}
