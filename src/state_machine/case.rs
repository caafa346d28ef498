//! Cases: node-level interactions nested under a job.
//!
//! A [`Case`] keeps an append-only log of [`CaseNodeUpdate`]s whose indices
//! are assigned here, never by the caller. Every update is mirrored to the
//! account the case was started with. The case only holds a weak handle to
//! that account; it never keeps it alive.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::state::{EntityEvent, EntityStatus, Lifecycle, Stateful};
use crate::account::Account;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseNodeType {
    Chat,
    Trigger,
    Notification,
    Validation,
    Delivery,
    Error,
    Warning,
    Info,
}

/// Describes one step of a case's structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseNode {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub node_type: CaseNodeType,
}

impl CaseNode {
    pub fn new(name: impl Into<String>, description: impl Into<String>, node_type: CaseNodeType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            node_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseNodeUpdate {
    /// Assigned by the case when the update is recorded.
    pub index: Option<u32>,
    pub cost: Option<f64>,
    pub name: Option<String>,
    pub payload: Option<Value>,
    #[serde(default)]
    pub is_final: bool,
    pub question: Option<Value>,
    pub error: Option<String>,
}

impl CaseNodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_question(mut self, question: Value) -> Self {
        self.question = Some(question);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Case {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub description: String,
    pub status: EntityStatus,
    pub nodes: Vec<CaseNode>,
    updates: Vec<CaseNodeUpdate>,
    pub total_cost: f64,
    pub final_delivery: Option<Value>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    account: Weak<dyn Account>,
}

impl Case {
    /// Create a case, move it to `IN_PROGRESS` and announce it to the account.
    ///
    /// The case is built in `STOPPED` and immediately receives `START_WORK`,
    /// so callers never observe the initial status.
    pub async fn start(
        job_id: impl Into<String>,
        name: impl Into<String>,
        account: &Arc<dyn Account>,
        description: impl Into<String>,
        nodes: Vec<CaseNode>,
        case_id: Option<String>,
    ) -> Result<Case> {
        let mut case = Case {
            id: case_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            job_id: job_id.into(),
            name: name.into(),
            description: description.into(),
            status: EntityStatus::Stopped,
            nodes,
            updates: Vec::new(),
            total_cost: 0.0,
            final_delivery: None,
            finished_at: None,
            account: Arc::downgrade(account),
        };
        info!(case_ref = %case.case_ref(), "case created");

        Lifecycle::apply(&mut case, EntityEvent::StartWork)?;

        if let Err(e) = account.send_start_case(&case).await {
            error!(case_ref = %case.case_ref(), error = %e, "failed to announce case start");
        }
        Ok(case)
    }

    pub fn uri(&self) -> String {
        format!("case:{}", self.id)
    }

    pub fn case_ref(&self) -> String {
        format!("{}-{}", self.job_id, self.id)
    }

    pub fn updates(&self) -> &[CaseNodeUpdate] {
        &self.updates
    }

    /// Sum of recorded update costs; missing costs count as zero.
    pub fn calculated_cost(&self) -> f64 {
        self.updates.iter().map(|u| u.cost.unwrap_or(0.0)).sum()
    }

    fn next_index(&self) -> u32 {
        self.updates.len() as u32 + 1
    }

    /// Record an update. The account is notified first; the update is kept
    /// locally even when that notification fails.
    ///
    /// An update carrying an error fails the case before it is recorded.
    pub async fn update(&mut self, mut update: CaseNodeUpdate) -> Result<()> {
        update.index = Some(self.next_index());
        if update.error.is_some() {
            Lifecycle::apply(self, EntityEvent::FailedEvent)?;
        }
        self.notify_update(&update).await;
        self.updates.push(update);
        Ok(())
    }

    /// Record a question for a human and pause the case.
    pub async fn request_human_input(&mut self, mut update: CaseNodeUpdate) -> Result<()> {
        update.index = Some(self.next_index());
        Lifecycle::apply(self, EntityEvent::InputRequested)?;
        info!(case_ref = %self.case_ref(), index = ?update.index, "case awaiting human input");
        self.notify_update(&update).await;
        self.updates.push(update);
        Ok(())
    }

    pub fn receive_human_input(&mut self) -> Result<EntityStatus> {
        Lifecycle::apply(self, EntityEvent::InputReceived)
    }

    pub fn resume(&mut self) -> Result<EntityStatus> {
        self.receive_human_input()
    }

    /// Complete the case with its final deliverable.
    ///
    /// `total_cost` becomes `final_cost` when given, otherwise the sum of the
    /// recorded update costs.
    pub async fn close(&mut self, result: Value, final_cost: Option<f64>) -> Result<()> {
        Lifecycle::apply(self, EntityEvent::SuccessfullyDone)?;
        self.total_cost = final_cost.unwrap_or_else(|| self.calculated_cost());
        info!(case_ref = %self.case_ref(), total_cost = self.total_cost, "closing case");

        let update = CaseNodeUpdate {
            index: Some(self.next_index()),
            payload: Some(result.clone()),
            is_final: true,
            ..Default::default()
        };
        self.final_delivery = Some(result);
        self.finished_at = Some(Utc::now());
        self.notify_update(&update).await;
        self.updates.push(update);
        Ok(())
    }

    async fn notify_update(&self, update: &CaseNodeUpdate) {
        let Some(account) = self.account.upgrade() else {
            warn!(case_ref = %self.case_ref(), "account dropped, case update not sent");
            return;
        };
        if let Err(e) = account.send_update_case(self, update).await {
            error!(
                case_ref = %self.case_ref(),
                index = ?update.index,
                error = %e,
                "failed to send case update"
            );
        }
    }
}

impl Stateful for Case {
    fn status(&self) -> EntityStatus {
        self.status
    }

    fn set_status(&mut self, status: EntityStatus) {
        self.status = status;
    }

    fn entity_ref(&self) -> String {
        self.uri()
    }
}

/// Cases keyed by job id, then case id.
#[derive(Debug, Default)]
pub struct CaseRegistry {
    by_job: HashMap<String, HashMap<String, Case>>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, case: Case) -> Result<()> {
        let cases = self.by_job.entry(case.job_id.clone()).or_default();
        if cases.contains_key(&case.id) {
            return Err(ControlError::Validation(format!(
                "Case with ID {} already exists for job {}",
                case.id, case.job_id
            )));
        }
        cases.insert(case.id.clone(), case);
        Ok(())
    }

    pub fn get(&self, job_id: &str, case_id: &str) -> Option<&Case> {
        self.by_job.get(job_id).and_then(|c| c.get(case_id))
    }

    pub fn get_mut(&mut self, job_id: &str, case_id: &str) -> Option<&mut Case> {
        self.by_job.get_mut(job_id).and_then(|c| c.get_mut(case_id))
    }

    pub fn job_cases(&self, job_id: &str) -> impl Iterator<Item = &Case> {
        self.by_job.get(job_id).into_iter().flat_map(|c| c.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::testing::RecordingAccount;
    use crate::account::EventType;

    fn nodes() -> Vec<CaseNode> {
        vec![
            CaseNode::new("Score", "Score the lead", CaseNodeType::Validation),
            CaseNode::new("Deliver", "Send the result", CaseNodeType::Delivery),
        ]
    }

    async fn started(account: &Arc<dyn Account>) -> Case {
        Case::start("job-1", "Lead 42", account, "Qualify lead 42", nodes(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_is_observed_in_progress_and_announced() {
        let recorder = Arc::new(RecordingAccount::default());
        let account: Arc<dyn Account> = recorder.clone();
        let case = started(&account).await;

        assert_eq!(case.status, EntityStatus::InProgress);
        assert_eq!(case.uri(), format!("case:{}", case.id));
        assert_eq!(case.case_ref(), format!("job-1-{}", case.id));
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::CaseStart);
        assert_eq!(events[0].details["status"], "in_progress");
    }

    #[tokio::test]
    async fn explicit_case_id_is_kept() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let case = Case::start("job-1", "n", &account, "d", vec![], Some("c-7".into()))
            .await
            .unwrap();
        assert_eq!(case.id, "c-7");
    }

    #[tokio::test]
    async fn update_indices_are_sequential_from_one() {
        let recorder = Arc::new(RecordingAccount::default());
        let account: Arc<dyn Account> = recorder.clone();
        let mut case = started(&account).await;

        for i in 0..5 {
            let update = CaseNodeUpdate::new()
                .named(format!("step {i}"))
                .with_payload(serde_json::json!({ "i": i }));
            case.update(update).await.unwrap();
        }
        for (i, update) in case.updates().iter().enumerate() {
            assert_eq!(update.index, Some(i as u32 + 1));
        }
        // One start event plus five updates.
        assert_eq!(recorder.events().len(), 6);
    }

    #[tokio::test]
    async fn caller_supplied_index_is_overwritten() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        let update = CaseNodeUpdate {
            index: Some(99),
            ..Default::default()
        };
        case.update(update).await.unwrap();
        assert_eq!(case.updates()[0].index, Some(1));
    }

    #[tokio::test]
    async fn update_is_kept_when_notification_fails() {
        let recorder = Arc::new(RecordingAccount::default());
        let account: Arc<dyn Account> = recorder.clone();
        let mut case = started(&account).await;

        recorder.fail_sends(true);
        case.update(CaseNodeUpdate::new().with_cost(1.5)).await.unwrap();
        assert_eq!(case.updates().len(), 1);
        assert_eq!(case.updates()[0].index, Some(1));
    }

    #[tokio::test]
    async fn update_is_kept_when_account_is_gone() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        drop(account);

        case.update(CaseNodeUpdate::new()).await.unwrap();
        assert_eq!(case.updates().len(), 1);
    }

    #[tokio::test]
    async fn close_sums_costs_when_no_final_cost() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        assert_eq!(case.status, EntityStatus::InProgress);

        case.update(CaseNodeUpdate::new().with_cost(5.0)).await.unwrap();
        case.close(serde_json::json!({"ok": true}), None).await.unwrap();

        assert_eq!(case.total_cost, 5.0);
        assert_eq!(case.status, EntityStatus::Completed);
        assert_eq!(case.final_delivery, Some(serde_json::json!({"ok": true})));
        assert!(case.finished_at.is_some());

        let last = case.updates().last().unwrap();
        assert!(last.is_final);
        assert_eq!(last.index, Some(2));
    }

    #[tokio::test]
    async fn close_prefers_explicit_final_cost() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        case.update(CaseNodeUpdate::new().with_cost(5.0)).await.unwrap();
        case.update(CaseNodeUpdate::new()).await.unwrap();
        assert_eq!(case.calculated_cost(), 5.0);

        case.close(serde_json::json!({}), Some(12.5)).await.unwrap();
        assert_eq!(case.total_cost, 12.5);
    }

    #[tokio::test]
    async fn closed_case_cannot_close_again() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        case.close(serde_json::json!({}), None).await.unwrap();
        let updates = case.updates().len();

        let err = case.close(serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, ControlError::Transition { .. }));
        assert_eq!(case.updates().len(), updates);
    }

    #[tokio::test]
    async fn human_input_pauses_and_resumes() {
        let recorder = Arc::new(RecordingAccount::default());
        let account: Arc<dyn Account> = recorder.clone();
        let mut case = started(&account).await;

        let question = CaseNodeUpdate::new()
            .named("Approve?")
            .with_question(serde_json::json!({"question": "Send the offer?"}));
        case.request_human_input(question).await.unwrap();
        assert_eq!(case.status, EntityStatus::Awaiting);
        assert_eq!(case.updates()[0].index, Some(1));

        assert_eq!(case.receive_human_input().unwrap(), EntityStatus::Awaiting);
        assert_eq!(case.status, EntityStatus::InProgress);
        assert!(case.resume().is_err());
    }

    #[tokio::test]
    async fn rejected_input_request_sends_nothing() {
        let recorder = Arc::new(RecordingAccount::default());
        let account: Arc<dyn Account> = recorder.clone();
        let mut case = started(&account).await;
        let question = || CaseNodeUpdate::new().with_question(serde_json::json!({"q": "ok?"}));

        case.request_human_input(question()).await.unwrap();
        assert!(case.request_human_input(question()).await.is_err());
        assert_eq!(recorder.events_of(EventType::CaseUpdate).len(), 1);
        assert_eq!(case.updates().len(), 1);

        case.receive_human_input().unwrap();
        case.update(CaseNodeUpdate::new().named("next")).await.unwrap();
        let remote: Vec<_> = recorder
            .events_of(EventType::CaseUpdate)
            .iter()
            .map(|e| e.details["index"].clone())
            .collect();
        assert_eq!(remote, vec![serde_json::json!(1), serde_json::json!(2)]);
        assert_eq!(case.updates()[1].index, Some(2));
    }

    #[tokio::test]
    async fn error_update_fails_the_case() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut case = started(&account).await;
        case.update(CaseNodeUpdate::new().with_error("crm unreachable"))
            .await
            .unwrap();
        assert_eq!(case.status, EntityStatus::Failed);
        assert_eq!(case.updates().len(), 1);
    }

    #[tokio::test]
    async fn registry_groups_cases_by_job() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::default());
        let mut registry = CaseRegistry::new();
        let a = Case::start("job-1", "a", &account, "", vec![], Some("a".into())).await.unwrap();
        let b = Case::start("job-1", "b", &account, "", vec![], Some("b".into())).await.unwrap();
        let dup = Case::start("job-1", "a", &account, "", vec![], Some("a".into())).await.unwrap();
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();
        assert!(registry.insert(dup).is_err());
        assert_eq!(registry.job_cases("job-1").count(), 2);
        assert!(registry.get("job-1", "b").is_some());
        assert!(registry.get_mut("job-1", "a").unwrap().resume().is_err());
    }

    #[test]
    fn node_type_serializes_as_type() {
        let node = CaseNode::new("n", "d", CaseNodeType::Notification);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "notification");
    }
}
