mod case;
mod job;
mod state;

pub use case::{Case, CaseNode, CaseNodeType, CaseNodeUpdate, CaseRegistry};
pub use job::{Job, JobContext, JobInstructions, JobRegistry, JobResponse};
pub use state::{EntityEvent, EntityStatus, Lifecycle, Stateful, TRANSITIONS, Transition};

#[cfg(test)]
pub(crate) use job::test_context;
