use std::collections::HashMap;
use std::sync::Mutex;

/// Where parameters flagged `is_environment` are exported.
pub trait EnvironmentOverlay: Send + Sync {
    fn set(&self, name: &str, value: &str);
    fn get(&self, name: &str) -> Option<String>;
}

/// Writes straight into the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl EnvironmentOverlay for ProcessEnvironment {
    fn set(&self, name: &str, value: &str) {
        // SAFETY: parameter updates run on the single writer that owns the
        // agent; the host must not read the environment concurrently.
        unsafe { std::env::set_var(name, value) }
    }

    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment kept in memory, for hosts that sandbox their agents.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<HashMap<String, String>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.vars.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl EnvironmentOverlay for MemoryEnvironment {
    fn set(&self, name: &str, value: &str) {
        if let Ok(mut vars) = self.vars.lock() {
            vars.insert(name.to_string(), value.to_string());
        }
    }

    fn get(&self, name: &str) -> Option<String> {
        self.vars.lock().ok().and_then(|v| v.get(name).cloned())
    }
}
