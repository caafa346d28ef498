//! Lifecycle control for pluggable agents.
//!
//! Agents declare their methods up front; [`orchestrator::JobOrchestrator`]
//! dispatches them for [`state_machine::Job`]s, and [`state_machine::Case`]s
//! track the finer steps of a job. Every transition goes through
//! [`state_machine::Lifecycle`] and is mirrored to the remote
//! [`account::Account`]. The [`vault`] decrypts values the account pushes.

pub mod account;
pub mod agent;
pub mod config;
pub mod error;
pub mod job_service;
pub mod orchestrator;
pub mod server;
pub mod state_machine;
pub mod vault;

pub use error::{ControlError, Result};
