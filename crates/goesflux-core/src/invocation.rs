use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{ErrorDetail, ExecutionError};

pub type Payload = Map<String, Value>;

/// A single request from the trigger source: which task to run, and with what payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub name: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default = "Uuid::new_v4", skip_serializing)]
    pub invocation_id: Uuid,
}

impl Invocation {
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            invocation_id: Uuid::new_v4(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Payload::new())
    }

    /// Builds an invocation from a scheduled-rule event.
    ///
    /// The task name is everything after the first `rule/` in `resources[0]`; the whole event is
    /// kept in the payload under `"event"`.
    pub fn from_scheduled_event(event: &Value) -> Result<Self, ExecutionError> {
        let resource = event
            .get("resources")
            .and_then(Value::as_array)
            .and_then(|resources| resources.first())
            .ok_or_else(|| {
                ExecutionError::InvalidInvocation("event is missing 'resources'".into())
            })?;
        let arn = resource.as_str().ok_or_else(|| {
            ExecutionError::InvalidInvocation("event resource is not a string".into())
        })?;
        let name = rule_name_from_arn(arn)?;

        let mut payload = Payload::new();
        payload.insert("event".to_string(), event.clone());
        Ok(Self::new(name, payload))
    }

    /// Short BLAKE3 digest of the payload, for correlating log lines without dumping the payload.
    pub fn payload_digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.payload).unwrap_or_default();
        let hash = blake3::hash(&bytes).to_hex();
        hash.as_str()[..16].to_string()
    }
}

pub fn rule_name_from_arn(arn: &str) -> Result<&str, ExecutionError> {
    match arn.split_once("rule/") {
        Some((_, name)) if !name.is_empty() => Ok(name),
        _ => Err(ExecutionError::InvalidInvocation(format!(
            "could not extract rule name from '{arn}'"
        ))),
    }
}

/// Outcome of exactly one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Completed { task: String, output: Value },
    Failed { task: String, error: ErrorDetail },
}

impl TaskResult {
    pub fn failed(task: impl Into<String>, err: &ExecutionError) -> Self {
        TaskResult::Failed {
            task: task.into(),
            error: err.detail(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, TaskResult::Completed { .. })
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match self {
            TaskResult::Completed { .. } => None,
            TaskResult::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_response(self) -> InvocationResponse {
        match self {
            TaskResult::Completed { output, .. } => InvocationResponse {
                status_code: 200,
                body: json!({ "result": output }),
            },
            TaskResult::Failed { error, .. } => InvocationResponse {
                status_code: 500,
                body: json!({ "error": error }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    /// For failures that happen before a task name is known (e.g. an unparseable event).
    pub fn from_error(err: &ExecutionError) -> Self {
        InvocationResponse {
            status_code: 500,
            body: json!({ "error": err.detail() }),
        }
    }
}
