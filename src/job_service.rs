//! Job creation and the hook that fires when a job finishes.

use async_trait::async_trait;
use tracing::debug;

use crate::account::Event;
use crate::agent::Agent;
use crate::error::{ControlError, Result};
use crate::server::Server;
use crate::state_machine::{Job, JobContext};

/// Called once a dispatched job reaches a terminal status.
#[async_trait]
pub trait JobFinishedHook: Send + Sync {
    async fn notify(&self, job: &Job, server: &Server) -> Result<()>;
}

/// Sends `agent.job.finished` through the server's account.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendJobFinishedEvent;

#[async_trait]
impl JobFinishedHook for SendJobFinishedEvent {
    async fn notify(&self, job: &Job, server: &Server) -> Result<()> {
        let Some(account) = server.account() else {
            return Err(ControlError::Config("No account defined".into()));
        };
        let event = Event::job_finished(job)?;
        account.send_event(&job.id, &event).await?;
        Ok(())
    }
}

/// Build the job for a start request.
///
/// Encrypted agent parameters are only read when the agent declares a
/// parameter setup. The caller registers and dispatches the job.
pub fn prepare_job(
    server: &Server,
    agent: &Agent,
    context: JobContext,
    encrypted_agent_parameters: Option<&str>,
) -> Result<Job> {
    let agent_parameters = match (&agent.parameters_setup, encrypted_agent_parameters) {
        (Some(_), Some(encrypted)) if !encrypted.is_empty() => {
            Some(server.vault().decrypt_object(encrypted)?)
        }
        _ => None,
    };
    let job = Job::new(context, &agent.name, agent_parameters);
    debug!(job_id = %job.id, agent = %agent.name, "job prepared");
    Ok(job)
}
