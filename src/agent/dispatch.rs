//! Turning a method declaration into a call and a [`JobResponse`].
//!
//! Callables live in a [`MethodTable`] keyed by the `method` string of their
//! declaration. Resolution happens at call time, so a declaration whose key
//! is missing from the table only fails when it is invoked.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::fields::json_kind;
use super::methods::AgentMethod;
use crate::error::{ControlError, Result};
use crate::state_machine::{JobContext, JobResponse};

/// A registered agent callable. It must return a serialized [`JobResponse`].
pub type MethodFn = Arc<dyn Fn(&MethodArgs) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodFn>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MethodArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Keyword arguments handed to a method.
///
/// Built in a fixed order: static params, form fields, job context, agent
/// parameters. A later source wins on a key collision.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MethodArgs(Map<String, Value>);

impl MethodArgs {
    pub fn from_params(params: &Map<String, Value>) -> Self {
        Self(params.clone())
    }

    pub fn fields(mut self, fields: Map<String, Value>) -> Self {
        self.0.insert("fields".into(), Value::Object(fields));
        self
    }

    pub fn context(mut self, context: &JobContext) -> Result<Self> {
        self.0.insert("context".into(), serde_json::to_value(context)?);
        Ok(self)
    }

    pub fn agent_parameters(mut self, parameters: Option<&Map<String, Value>>) -> Self {
        if let Some(parameters) = parameters {
            self.0
                .insert("agent_parameters".into(), Value::Object(parameters.clone()));
        }
        self
    }

    /// Spread caller-supplied keys over what is already there.
    pub fn merge(mut self, extra: &Map<String, Value>) -> Self {
        for (k, v) in extra {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `job_id` from the context, when one was attached.
    pub fn job_id(&self) -> Option<&str> {
        self.0
            .get("context")
            .and_then(|c| c.get("job_id"))
            .and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Resolves declarations against a table and checks what comes back.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'a> {
    table: &'a MethodTable,
}

impl<'a> Dispatcher<'a> {
    pub fn new(table: &'a MethodTable) -> Self {
        Self { table }
    }

    pub fn invoke(&self, descriptor: &AgentMethod, args: &MethodArgs) -> Result<JobResponse> {
        if descriptor.is_async {
            return Err(ControlError::NotImplemented(format!(
                "asynchronous dispatch of method `{}`",
                descriptor.method
            )));
        }
        let Some(callable) = self.table.get(&descriptor.method) else {
            return Err(ControlError::Dispatch(format!(
                "Method `{}` ({}) is not registered",
                descriptor.method, descriptor.name
            )));
        };

        debug!(method = %descriptor.method, args = args.as_map().len(), "invoking agent method");
        let value = callable(args).map_err(|source| ControlError::Execution {
            method: descriptor.method.clone(),
            source,
        })?;
        Self::expect_job_response(&descriptor.method, value)
    }

    fn expect_job_response(method: &str, value: Value) -> Result<JobResponse> {
        let kind = json_kind(&value);
        serde_json::from_value::<JobResponse>(value).map_err(|e| {
            ControlError::Dispatch(format!(
                "Method `{method}` must return a job response \
                 {{job_id, status, message, payload, error?}}, got {kind} ({e})"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{EntityStatus, test_context};
    use serde_json::json;

    fn table() -> MethodTable {
        MethodTable::new()
            .register("ok", |args| {
                let job_id = args.job_id().unwrap_or("none").to_string();
                Ok(JobResponse::new(job_id, EntityStatus::Completed, "done")
                    .with_payload(args.get("fields").cloned().unwrap_or(Value::Null))
                    .into())
            })
            .register("boom", |_| anyhow::bail!("crm unreachable"))
            .register("bad-shape", |_| Ok(json!("done")))
            .register("bad-status", |_| {
                Ok(json!({"job_id": "j", "status": "exploded", "message": "?"}))
            })
    }

    #[test]
    fn args_follow_merge_order() {
        let mut static_params = Map::new();
        static_params.insert("fields".into(), json!("static"));
        static_params.insert("verbose".into(), json!(true));
        let mut fields = Map::new();
        fields.insert("company".into(), json!("Acme"));
        let mut agent_params = Map::new();
        agent_params.insert("API_TOKEN".into(), json!("t"));

        let mut ctx = test_context();
        ctx.job_id = Some("job-9".into());
        let args = MethodArgs::from_params(&static_params)
            .fields(fields)
            .context(&ctx)
            .unwrap()
            .agent_parameters(Some(&agent_params));

        assert_eq!(args.get("verbose"), Some(&json!(true)));
        assert_eq!(args.get("fields"), Some(&json!({"company": "Acme"})));
        assert_eq!(args.job_id(), Some("job-9"));
        assert_eq!(args.get("agent_parameters"), Some(&json!({"API_TOKEN": "t"})));
    }

    #[test]
    fn invoke_returns_typed_response() {
        let table = table();
        let mut ctx = test_context();
        ctx.job_id = Some("job-1".into());
        let args = MethodArgs::default()
            .fields(json!({"n": 1}).as_object().cloned().unwrap())
            .context(&ctx)
            .unwrap();
        let response = Dispatcher::new(&table)
            .invoke(&AgentMethod::new("Ok", "ok"), &args)
            .unwrap();
        assert_eq!(response.job_id, "job-1");
        assert_eq!(response.status, EntityStatus::Completed);
        assert_eq!(response.payload, Some(json!({"n": 1})));
    }

    #[test]
    fn unregistered_method_is_dispatch_error() {
        let table = table();
        let err = Dispatcher::new(&table)
            .invoke(&AgentMethod::new("Missing", "nowhere"), &MethodArgs::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::Dispatch(ref m) if m.contains("nowhere")));
    }

    #[test]
    fn raising_method_is_execution_error() {
        let table = table();
        let err = Dispatcher::new(&table)
            .invoke(&AgentMethod::new("Boom", "boom"), &MethodArgs::default())
            .unwrap_err();
        assert_eq!(err.kind(), "ExecutionError");
        assert!(err.to_string().contains("crm unreachable"));
    }

    #[test]
    fn wrong_shape_names_actual_and_expected() {
        let table = table();
        let d = Dispatcher::new(&table);
        let msg = d
            .invoke(&AgentMethod::new("Bad", "bad-shape"), &MethodArgs::default())
            .unwrap_err()
            .to_string();
        assert!(msg.contains("got string"), "{msg}");
        assert!(msg.contains("job_id, status, message"), "{msg}");

        let err = d
            .invoke(&AgentMethod::new("Bad", "bad-status"), &MethodArgs::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::Dispatch(ref m) if m.contains("got object")));
    }

    #[test]
    fn async_methods_are_not_implemented() {
        let table = table();
        let err = Dispatcher::new(&table)
            .invoke(&AgentMethod::new("Ok", "ok").asynchronous(), &MethodArgs::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::NotImplemented(_)));
    }
}
