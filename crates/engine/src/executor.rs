//! Action planning and execution seam.
//!
//! The orchestrator plans one action per target, runs it through the
//! guardrail evaluator, and only then (in LIVE mode) hands it back here
//! for execution. Implementations own the outbound side effect.

use async_trait::async_trait;
use thiserror::Error;

use conductor_core::domain::agent::Agent;

#[derive(Debug, Error)]
#[error("executor error: {0}")]
pub struct ExecutorError(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAction {
    pub action_type: String,
    pub target: String,
    /// Candidate message text, with `[field]` placeholders still
    /// unexpanded so the guardrail can check them.
    pub preview: String,
    /// External endpoint this action calls on execute, if any. Checked
    /// against the connector allowlist before delivery.
    pub endpoint: Option<String>,
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn plan(&self, agent: &Agent, target: &str) -> PlannedAction;

    async fn execute(&self, agent: &Agent, action: &PlannedAction) -> Result<(), ExecutorError>;
}

/// Default executor: plans a plain outreach message and performs no
/// outbound side effect on execute.
#[derive(Default)]
pub struct NoopExecutor;

#[async_trait]
impl ActionExecutor for NoopExecutor {
    fn plan(&self, agent: &Agent, target: &str) -> PlannedAction {
        PlannedAction {
            action_type: "send_message".to_string(),
            target: target.to_string(),
            preview: format!("Hi [first_name], this is {} with a quick check-in.", agent.name),
            endpoint: None,
        }
    }

    async fn execute(&self, _agent: &Agent, _action: &PlannedAction) -> Result<(), ExecutorError> {
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use conductor_core::domain::agent::Agent;

    use super::{ActionExecutor, ExecutorError, PlannedAction};

    /// Plans a fixed message per target and records what was executed.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        pub messages: HashMap<String, String>,
        pub endpoints: HashMap<String, String>,
        pub failing_targets: HashSet<String>,
        pub executed: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub fn with_message(mut self, target: &str, message: &str) -> Self {
            self.messages.insert(target.to_string(), message.to_string());
            self
        }

        pub fn with_endpoint(mut self, target: &str, endpoint: &str) -> Self {
            self.endpoints.insert(target.to_string(), endpoint.to_string());
            self
        }

        pub fn failing_on(mut self, target: &str) -> Self {
            self.failing_targets.insert(target.to_string());
            self
        }

        pub fn executed_targets(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        fn plan(&self, _agent: &Agent, target: &str) -> PlannedAction {
            let preview = self
                .messages
                .get(target)
                .cloned()
                .unwrap_or_else(|| format!("Hi [first_name], an update for {target}."));
            PlannedAction {
                action_type: "send_message".to_string(),
                target: target.to_string(),
                preview,
                endpoint: self.endpoints.get(target).cloned(),
            }
        }

        async fn execute(
            &self,
            _agent: &Agent,
            action: &PlannedAction,
        ) -> Result<(), ExecutorError> {
            if self.failing_targets.contains(&action.target) {
                return Err(ExecutorError(format!("delivery failed for {}", action.target)));
            }
            self.executed.lock().unwrap().push(action.target.clone());
            Ok(())
        }
    }
}
