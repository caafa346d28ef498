use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::state::{EntityEvent, EntityStatus, Lifecycle, Stateful};
use crate::error::{ControlError, Result};

/// Limits a caller may attach to a job. Checked by agent code, not by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInstructions {
    #[serde(default)]
    pub max_cases: Option<u32>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub stop_on_warning: bool,
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
}

fn default_stop_on_error() -> bool {
    true
}

impl JobInstructions {
    /// Returns the first exceeded limit, if any.
    pub fn check(&self, cases: u32, elapsed: Duration, cost: f64) -> Result<(), String> {
        if let Some(max) = self.max_cases
            && cases >= max
        {
            return Err(format!("Max cases {max} reached"));
        }
        if let Some(max) = self.max_duration_secs
            && elapsed.as_secs() >= max
        {
            return Err(format!("Max duration {max} seconds reached"));
        }
        if let Some(max) = self.max_cost
            && cost >= max
        {
            return Err(format!("Max cost {max} reached"));
        }
        Ok(())
    }
}

/// Who started a job and on behalf of which mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub workspace_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub mission_id: String,
    pub mission_name: String,
    #[serde(default)]
    pub mission_context: Option<Value>,
    #[serde(default)]
    pub job_instructions: Option<JobInstructions>,
}

/// One entry of a job's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: EntityStatus,
    pub message: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobResponse {
    pub fn new(job_id: impl Into<String>, status: EntityStatus, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            message: message.into(),
            payload: None,
            error: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl From<JobResponse> for Value {
    fn from(response: JobResponse) -> Self {
        serde_json::json!({
            "job_id": response.job_id,
            "status": response.status,
            "message": response.message,
            "payload": response.payload,
            "error": response.error,
        })
    }
}

/// One unit of agent work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub agent_name: String,
    pub status: EntityStatus,
    pub context: JobContext,
    pub payload: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    responses: Vec<JobResponse>,
    /// Decrypted agent parameters. Never serialized.
    #[serde(skip)]
    pub agent_parameters: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job in `IN_PROGRESS`. The id comes from the context when the
    /// caller supplied one.
    pub fn new(
        context: JobContext,
        agent_name: impl Into<String>,
        agent_parameters: Option<Map<String, Value>>,
    ) -> Self {
        let id = context
            .job_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            agent_name: agent_name.into(),
            status: EntityStatus::InProgress,
            context,
            payload: None,
            result: None,
            error: None,
            responses: Vec::new(),
            agent_parameters,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn responses(&self) -> &[JobResponse] {
        &self.responses
    }

    pub fn last_response(&self) -> Option<&JobResponse> {
        self.responses.last()
    }

    /// Append a response and mirror its status onto the job.
    pub fn add_response(&mut self, response: JobResponse) {
        self.status = response.status;
        self.payload = response.payload.clone();
        match response.status {
            EntityStatus::Completed => {
                self.result = response.payload.clone();
                self.finished_at = Some(Utc::now());
            }
            EntityStatus::Failed => {
                self.error = Some(response.error.clone().unwrap_or_else(|| response.message.clone()));
                self.finished_at = Some(Utc::now());
            }
            EntityStatus::Cancelled => {
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        self.responses.push(response);
    }

    pub fn request_input(&mut self) -> Result<EntityStatus> {
        Lifecycle::apply(self, EntityEvent::InputRequested)
    }

    pub fn receive_input(&mut self) -> Result<EntityStatus> {
        Lifecycle::apply(self, EntityEvent::InputReceived)
    }

    pub fn request_cancel(&mut self) -> Result<EntityStatus> {
        Lifecycle::apply(self, EntityEvent::CancelRequested)
    }

    pub fn confirm_cancelled(&mut self) -> Result<EntityStatus> {
        let prior = Lifecycle::apply(self, EntityEvent::CancelledEvent)?;
        self.finished_at = Some(Utc::now());
        Ok(prior)
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.created_at).to_std().unwrap_or_default()
    }

    /// Checks the context's instructions against the work done so far.
    /// A job without instructions has no limits.
    pub fn check_limits(&self, cases: u32, cost: f64) -> Result<(), String> {
        match &self.context.job_instructions {
            Some(instructions) => instructions.check(cases, self.elapsed(), cost),
            None => Ok(()),
        }
    }
}

impl Stateful for Job {
    fn status(&self) -> EntityStatus {
        self.status
    }

    fn set_status(&mut self, status: EntityStatus) {
        self.status = status;
    }

    fn entity_ref(&self) -> String {
        format!("job:{}", self.id)
    }
}

/// Jobs grouped by agent name. Ids are unique per agent.
#[derive(Debug, Default)]
pub struct JobRegistry {
    by_agent: HashMap<String, HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) -> Result<()> {
        let jobs = self.by_agent.entry(job.agent_name.clone()).or_default();
        if jobs.contains_key(&job.id) {
            return Err(ControlError::Validation(format!(
                "Job with ID {} already exists for agent {}",
                job.id, job.agent_name
            )));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Look a job up, optionally restricted to one agent.
    pub fn get(&self, job_id: &str, agent_name: Option<&str>) -> Option<&Job> {
        match agent_name {
            Some(agent) => self.by_agent.get(agent).and_then(|jobs| jobs.get(job_id)),
            None => self.by_agent.values().find_map(|jobs| jobs.get(job_id)),
        }
    }

    pub fn get_mut(&mut self, job_id: &str, agent_name: Option<&str>) -> Option<&mut Job> {
        match agent_name {
            Some(agent) => self
                .by_agent
                .get_mut(agent)
                .and_then(|jobs| jobs.get_mut(job_id)),
            None => self
                .by_agent
                .values_mut()
                .find_map(|jobs| jobs.get_mut(job_id)),
        }
    }

    pub fn agent_jobs(&self, agent_name: &str) -> impl Iterator<Item = &Job> {
        self.by_agent
            .get(agent_name)
            .into_iter()
            .flat_map(|jobs| jobs.values())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.get(job_id, None).is_some()
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> JobContext {
    JobContext {
        workspace_id: "ws-1".into(),
        job_id: None,
        started_by: "operator".into(),
        started_at: Utc::now(),
        mission_id: "mission-1".into(),
        mission_name: "Lead qualification".into(),
        mission_context: None,
        job_instructions: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new(test_context(), "crm-agent", None);
        assert_eq!(job.status, EntityStatus::InProgress);
        assert!(job.responses().is_empty());
        assert!(job.finished_at.is_none());
        assert!(Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn job_id_taken_from_context() {
        let mut ctx = test_context();
        ctx.job_id = Some("job-42".into());
        let job = Job::new(ctx, "crm-agent", None);
        assert_eq!(job.id, "job-42");
    }

    #[test]
    fn completed_response_sets_result_and_finish_time() {
        let mut job = Job::new(test_context(), "crm-agent", None);
        job.add_response(
            JobResponse::new(&job.id, EntityStatus::Completed, "done")
                .with_payload(serde_json::json!({"leads": 3})),
        );
        assert_eq!(job.status, EntityStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!({"leads": 3})));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn failed_response_records_error() {
        let mut job = Job::new(test_context(), "crm-agent", None);
        job.add_response(
            JobResponse::new(&job.id, EntityStatus::Failed, "Job execution failed")
                .with_error("timeout"),
        );
        assert_eq!(job.status, EntityStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("timeout"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn response_log_never_shrinks() {
        let mut job = Job::new(test_context(), "crm-agent", None);
        let mut last = 0;
        for status in [
            EntityStatus::InProgress,
            EntityStatus::Awaiting,
            EntityStatus::InProgress,
            EntityStatus::Completed,
        ] {
            job.add_response(JobResponse::new(&job.id, status, "step"));
            assert!(job.responses().len() > last);
            last = job.responses().len();
        }
        assert_eq!(last, 4);
    }

    #[test]
    fn cancel_flow_goes_through_lifecycle() {
        let mut job = Job::new(test_context(), "crm-agent", None);
        assert_eq!(job.request_cancel().unwrap(), EntityStatus::InProgress);
        assert_eq!(job.status, EntityStatus::Cancelling);
        job.confirm_cancelled().unwrap();
        assert_eq!(job.status, EntityStatus::Cancelled);
        assert!(job.finished_at.is_some());
        assert!(job.request_cancel().is_err());
    }

    #[test]
    fn input_flow_goes_through_lifecycle() {
        let mut job = Job::new(test_context(), "crm-agent", None);
        job.request_input().unwrap();
        assert_eq!(job.status, EntityStatus::Awaiting);
        job.receive_input().unwrap();
        assert_eq!(job.status, EntityStatus::InProgress);
    }

    #[test]
    fn agent_parameters_are_not_serialized() {
        let mut params = Map::new();
        params.insert("API_TOKEN".into(), Value::String("secret".into()));
        let job = Job::new(test_context(), "crm-agent", Some(params));
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("agent_parameters"));
    }

    #[test]
    fn job_response_value_shape() {
        let value: Value = JobResponse::new("j1", EntityStatus::Awaiting, "need input").into();
        assert_eq!(value["status"], "awaiting");
        assert_eq!(value["job_id"], "j1");
        let back: JobResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back.status, EntityStatus::Awaiting);
    }

    #[test]
    fn instructions_report_first_exceeded_limit() {
        let instructions = JobInstructions {
            max_cases: Some(10),
            max_duration_secs: Some(60),
            max_cost: Some(5.0),
            ..Default::default()
        };
        assert!(instructions.check(1, Duration::from_secs(1), 1.0).is_ok());
        assert_eq!(
            instructions.check(10, Duration::from_secs(1), 1.0).unwrap_err(),
            "Max cases 10 reached"
        );
        assert_eq!(
            instructions.check(1, Duration::from_secs(61), 1.0).unwrap_err(),
            "Max duration 60 seconds reached"
        );
        assert_eq!(
            instructions.check(1, Duration::from_secs(1), 5.0).unwrap_err(),
            "Max cost 5 reached"
        );
    }

    #[test]
    fn job_limits_follow_its_instructions() {
        let free = Job::new(test_context(), "crm-agent", None);
        assert!(free.check_limits(1_000, 1_000.0).is_ok());

        let mut context = test_context();
        context.job_instructions = Some(JobInstructions {
            max_cases: Some(3),
            max_duration_secs: Some(3_600),
            ..Default::default()
        });
        let job = Job::new(context, "crm-agent", None);
        assert!(job.elapsed() < Duration::from_secs(3_600));
        assert!(job.check_limits(2, 0.0).is_ok());
        assert_eq!(job.check_limits(3, 0.0).unwrap_err(), "Max cases 3 reached");
    }

    #[test]
    fn instructions_deserialize_defaults() {
        let parsed: JobInstructions = serde_json::from_str("{}").unwrap();
        assert!(parsed.stop_on_error);
        assert!(!parsed.stop_on_warning);
        assert!(parsed.max_cases.is_none());
    }

    #[test]
    fn registry_rejects_duplicate_ids_per_agent() {
        let mut ctx = test_context();
        ctx.job_id = Some("dup".into());
        let mut registry = JobRegistry::new();
        registry.insert(Job::new(ctx.clone(), "a", None)).unwrap();
        let err = registry.insert(Job::new(ctx.clone(), "a", None)).unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
        // Same id under another agent is fine.
        registry.insert(Job::new(ctx, "b", None)).unwrap();
        assert_eq!(registry.agent_jobs("a").count(), 1);
    }

    #[test]
    fn registry_lookup_with_and_without_agent() {
        let mut registry = JobRegistry::new();
        let job = Job::new(test_context(), "a", None);
        let id = job.id.clone();
        registry.insert(job).unwrap();
        assert!(registry.get(&id, Some("a")).is_some());
        assert!(registry.get(&id, Some("b")).is_none());
        assert!(registry.get(&id, None).is_some());
        assert!(registry.contains(&id));
        registry.get_mut(&id, None).unwrap().request_cancel().unwrap();
        assert_eq!(registry.get(&id, None).unwrap().status, EntityStatus::Cancelling);
    }
}
