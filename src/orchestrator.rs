use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::account::Event;
use crate::agent::{Agent, MethodArgs};
use crate::error::{ControlError, Result};
use crate::server::Server;
use crate::state_machine::{EntityEvent, EntityStatus, Job, JobContext, JobResponse};

/// Runs agent methods for jobs and records the outcome on the job.
pub struct JobOrchestrator<'a> {
    server: &'a Server,
}

impl<'a> JobOrchestrator<'a> {
    pub fn new(server: &'a Server) -> Self {
        Self { server }
    }

    /// Dispatch `method_name` (`job_start` or a custom key) for `job`.
    ///
    /// Every failure of the dispatch itself is appended to the job as a
    /// `FAILED` response and then returned. Problems found before dispatch
    /// (unknown method, invalid form, finished job) leave the job untouched.
    pub async fn start(
        &self,
        agent: &Agent,
        job: &mut Job,
        fields: &Map<String, Value>,
        context: &JobContext,
        method_name: &str,
    ) -> Result<()> {
        let descriptor = agent.start_method(method_name)?;
        if job.status.is_terminal() {
            return Err(ControlError::Transition {
                from: job.status,
                event: EntityEvent::StartWork,
            });
        }
        let record = descriptor.fields.validate(fields)?;
        let args = MethodArgs::from_params(&descriptor.params)
            .fields(record)
            .context(context)?
            .agent_parameters(job.agent_parameters.as_ref());

        self.confirm_start(job).await;

        job.add_response(JobResponse::new(
            &job.id,
            EntityStatus::InProgress,
            "Starting job execution",
        ));
        debug!(job_id = %job.id, method = %descriptor.method, "running agent method");

        let response = match agent.dispatcher().invoke(descriptor, &args) {
            Ok(response) => response,
            Err(e) => {
                error!(job_id = %job.id, method = %descriptor.method, error = %e, "job execution failed");
                job.add_response(
                    JobResponse::new(&job.id, EntityStatus::Failed, format!("Job execution failed: {e}"))
                        .with_error(e.to_string()),
                );
                return Err(e);
            }
        };

        if response.job_id != job.id {
            warn!(job_id = %job.id, response_job_id = %response.job_id, "method answered for another job id");
        }
        let status = response.status;
        match status {
            EntityStatus::Completed
            | EntityStatus::Failed
            | EntityStatus::Cancelled
            | EntityStatus::Cancelling => {
                job.add_response(response);
                info!(job_id = %job.id, %status, "job finished");
                if let Err(e) = self.server.job_finished_hook().notify(job, self.server).await {
                    error!(job_id = %job.id, error = %e, "job finished hook failed");
                }
            }
            EntityStatus::Awaiting => {
                job.add_response(response);
                info!(job_id = %job.id, "job awaiting input");
            }
            other => {
                // Neither finished nor waiting for input: the answer is not recorded.
                warn!(job_id = %job.id, status = %other, "job method returned a non-final status");
            }
        }
        Ok(())
    }

    async fn confirm_start(&self, job: &Job) {
        let Some(account) = self.server.account() else {
            warn!(job_id = %job.id, "no account configured, skipping start confirmation");
            return;
        };
        let sent = match Event::job_start_confirmation(job) {
            Ok(event) => account.send_event(&job.id, &event).await.map_err(ControlError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            error!(job_id = %job.id, error = %e, "failed to send job start confirmation");
        }
    }
}
