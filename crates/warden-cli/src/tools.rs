//! Typed tool surface over the supervisor's six operations, shaped for
//! registration with an embedding agent framework.

use async_trait::async_trait;
use serde_json::{json, Value};

use warden_supervisor::JobSupervisor;

/// Wire-level description of one registered tool.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Payload handed back to the embedding framework after execution.
#[derive(Debug, Clone)]
pub(crate) struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Converts the payload to text for insertion into a tool message.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

#[async_trait]
pub(crate) trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;
}

/// Builds the full tool set backed by one supervisor.
pub(crate) fn builtin_tools(supervisor: JobSupervisor) -> Vec<Box<dyn AgentTool>> {
    vec![
        Box::new(StartTool {
            supervisor: supervisor.clone(),
        }),
        Box::new(StatusTool {
            supervisor: supervisor.clone(),
        }),
        Box::new(OutputTool {
            supervisor: supervisor.clone(),
        }),
        Box::new(CancelTool {
            supervisor: supervisor.clone(),
        }),
        Box::new(CleanupTool {
            supervisor: supervisor.clone(),
        }),
        Box::new(SessionsTool { supervisor }),
    ]
}

fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    match arguments.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(format!("missing required parameter '{key}'")),
    }
}

fn optional_string(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_u64(arguments: &Value, key: &str) -> Option<u64> {
    arguments.get(key).and_then(Value::as_u64)
}

fn optional_bool(arguments: &Value, key: &str) -> bool {
    arguments
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

struct StartTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for StartTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "start".to_string(),
            description: "Start an assistant coding job in a detached container".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Task prompt for the assistant" },
                    "session_id": { "type": "string", "description": "Session to run the job in; a fresh session is created when omitted" }
                },
                "required": ["prompt"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let prompt = match required_string(&arguments, "prompt") {
            Ok(prompt) => prompt,
            Err(error) => return ToolExecutionResult::error(json!({ "error": error })),
        };
        let session_id = optional_string(&arguments, "session_id");
        match self.supervisor.start(&prompt, session_id.as_deref()).await {
            Ok(receipt) => ToolExecutionResult::ok(
                serde_json::to_value(&receipt).unwrap_or_else(|_| json!({})),
            ),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}

struct StatusTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for StatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "status".to_string(),
            description: "Inspect a job's status, activity, and output tail".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string" },
                    "session_id": { "type": "string" }
                },
                "required": ["job_id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let job_id = match required_string(&arguments, "job_id") {
            Ok(job_id) => job_id,
            Err(error) => return ToolExecutionResult::error(json!({ "error": error })),
        };
        let session_id = optional_string(&arguments, "session_id");
        match self.supervisor.status(&job_id, session_id.as_deref()).await {
            Ok(Some(report)) => ToolExecutionResult::ok(
                serde_json::to_value(&report).unwrap_or_else(|_| json!({})),
            ),
            Ok(None) => ToolExecutionResult::ok(json!(format!("job {job_id} not found"))),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}

struct OutputTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for OutputTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "output".to_string(),
            description: "Read one page of a job's raw output log".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string" },
                    "session_id": { "type": "string" },
                    "offset": { "type": "integer", "minimum": 0 },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["job_id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let job_id = match required_string(&arguments, "job_id") {
            Ok(job_id) => job_id,
            Err(error) => return ToolExecutionResult::error(json!({ "error": error })),
        };
        let session_id = optional_string(&arguments, "session_id");
        let offset = optional_u64(&arguments, "offset");
        let limit = optional_u64(&arguments, "limit");
        match self
            .supervisor
            .output(&job_id, session_id.as_deref(), offset, limit)
            .await
        {
            Ok(Some(page)) => ToolExecutionResult::ok(json!(page.render())),
            Ok(None) => ToolExecutionResult::ok(json!(format!("job {job_id} not found"))),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}

struct CancelTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for CancelTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cancel".to_string(),
            description: "Stop a job's container and mark the job cancelled".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string" },
                    "session_id": { "type": "string" }
                },
                "required": ["job_id"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let job_id = match required_string(&arguments, "job_id") {
            Ok(job_id) => job_id,
            Err(error) => return ToolExecutionResult::error(json!({ "error": error })),
        };
        let session_id = optional_string(&arguments, "session_id");
        match self.supervisor.cancel(&job_id, session_id.as_deref()).await {
            Ok(outcome) => ToolExecutionResult::ok(json!(outcome.describe())),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}

struct CleanupTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for CleanupTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cleanup".to_string(),
            description: "Delete idle sessions; workspaces survive unless opted in".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "delete_workspaces": { "type": "boolean", "default": false }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let delete_workspaces = optional_bool(&arguments, "delete_workspaces");
        match self.supervisor.cleanup(delete_workspaces).await {
            Ok(report) => ToolExecutionResult::ok(json!(report.describe())),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}

struct SessionsTool {
    supervisor: JobSupervisor,
}

#[async_trait]
impl AgentTool for SessionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "sessions".to_string(),
            description: "List sessions with activity and active-job summaries".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        match self.supervisor.sessions().await {
            Ok(sessions) => ToolExecutionResult::ok(
                serde_json::to_value(&sessions).unwrap_or_else(|_| json!([])),
            ),
            Err(error) => ToolExecutionResult::error(json!({ "error": error.to_string() })),
        }
    }
}
