pub mod drafts;
pub mod platform_tools;
pub mod schedule;

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Build a short string for logging tool args without leaking full content.
fn sanitize_args_for_log(tool_name: &str, args: &Value) -> String {
    let obj = match args.as_object() {
        Some(o) => o,
        None => return "args=?".to_string(),
    };
    let part = match tool_name {
        "publish_post" | "send_photo" => obj
            .get("draft")
            .or_else(|| obj.get("path"))
            .and_then(|v| v.as_str())
            .map(|s| format!("target={}", truncate_for_log(s, 120))),
        "save_draft" | "write_content_plan" => obj
            .get("text")
            .or_else(|| obj.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| format!("content_len={}", s.len())),
        "schedule_onetime_task" => obj
            .get("task_name")
            .and_then(|v| v.as_str())
            .map(|s| format!("task_name={}", s)),
        "generate_image" => obj
            .get("prompt")
            .and_then(|v| v.as_str())
            .map(|s| format!("prompt={}", truncate_for_log(s, 80))),
        _ => None,
    };
    part.unwrap_or_else(|| "args=...".to_string())
}

fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len.min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} chars)", &s[..end], s.len())
    }
}

/// A type-erased tool that can be stored in the registry.
#[async_trait::async_trait]
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn call(&self, args: Value) -> Result<String>;
}

/// A tool invocation as requested by the model within one assistant turn.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The reply fed back to the model for one tool call. `content` is either
/// the executor's output or an error payload (`{"status":"error",...}`) —
/// dispatch never lets a failure escape past this boundary.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        serde_json::from_str::<Value>(&self.content)
            .map(|v| v["status"] == "error")
            .unwrap_or(false)
    }
}

fn error_payload(message: impl std::fmt::Display) -> String {
    json!({ "status": "error", "message": message.to_string() }).to_string()
}

/// Registry that holds all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DynTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Returns an error if a tool with the same name already exists.
    pub fn register(&mut self, tool: Arc<dyn DynTool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            anyhow::bail!("Tool '{}' is already registered", name);
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Rig-compatible tool definitions advertised to the model.
    pub fn definitions(&self) -> Vec<rig::completion::ToolDefinition> {
        self.tools
            .values()
            .map(|t| rig::completion::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Check the call's arguments against the `required` list of the tool's
    /// parameter schema before execution.
    fn check_required(&self, tool: &dyn DynTool, args: &Value) -> Result<(), String> {
        let schema = tool.parameters_schema();
        let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        for key in required.iter().filter_map(|k| k.as_str()) {
            if args.get(key).is_none() {
                return Err(format!(
                    "missing required argument '{}' for tool '{}'",
                    key,
                    tool.name()
                ));
            }
        }
        Ok(())
    }

    /// Dispatch one tool call. Never fails past this boundary: unknown
    /// tools, bad arguments and executor errors all come back as an
    /// error-shaped `ToolResult` so the conversation can continue.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let content = match self.tools.get(&call.name) {
            None => error_payload(format!("Tool '{}' not found", call.name)),
            Some(tool) => match self.check_required(tool.as_ref(), &call.arguments) {
                Err(msg) => error_payload(msg),
                Ok(()) => match self.execute(&call.name, call.arguments.clone()).await {
                    Ok(output) => output,
                    Err(e) => error_payload(format!("{e:#}")),
                },
            },
        };
        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
        }
    }

    async fn execute(&self, name: &str, args: Value) -> Result<String> {
        let args_for_log = sanitize_args_for_log(name, &args);
        let span = tracing::info_span!(
            "tool_execution",
            tool_name = %name,
            args = %args_for_log,
        );
        let _guard = span.enter();

        debug!(tool_name = %name, args = ?args, "Tool call started");
        let start = std::time::Instant::now();
        let result = match self.tools.get(name) {
            Some(tool) => tool.call(args).await,
            None => anyhow::bail!("Tool '{}' not found", name),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(s) => {
                info!(
                    tool_name = %name,
                    duration_ms,
                    status = "success",
                    result_preview = %truncate_for_log(s, 200),
                    "Tool execution completed"
                );
            }
            Err(e) => {
                info!(
                    tool_name = %name,
                    duration_ms,
                    status = "failure",
                    error = %e,
                    "Tool execution failed"
                );
            }
        }

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTool {
        tool_name: String,
        fail: bool,
    }

    impl FakeTool {
        fn new(name: &str) -> Self {
            Self {
                tool_name: name.to_string(),
                fail: false,
            }
        }
        fn failing(name: &str) -> Self {
            Self {
                tool_name: name.to_string(),
                fail: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl DynTool for FakeTool {
        fn name(&self) -> &str {
            &self.tool_name
        }
        fn description(&self) -> &str {
            "fake tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "target": { "type": "string" } },
                "required": ["target"]
            })
        }
        async fn call(&self, args: Value) -> Result<String> {
            if self.fail {
                anyhow::bail!("executor exploded");
            }
            Ok(format!("{} ran on {}", self.tool_name, args["target"]))
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FakeTool::new("dup"))).unwrap();
        assert!(reg.register(Arc::new(FakeTool::new("dup"))).is_err());
        assert!(reg.get("dup").is_some());
    }

    #[test]
    fn definitions_carry_schema() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FakeTool::new("alpha"))).unwrap();
        let defs = reg.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[0].parameters["required"][0], "target");
    }

    #[tokio::test]
    async fn dispatch_runs_the_executor() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FakeTool::new("alpha"))).unwrap();
        let result = reg.dispatch(&call("alpha", json!({"target": "x"}))).await;
        assert_eq!(result.tool_call_id, "call-1");
        assert!(!result.is_error());
        assert!(result.content.contains("alpha ran"));
    }

    #[tokio::test]
    async fn dispatch_turns_executor_errors_into_error_payloads() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FakeTool::failing("boom"))).unwrap();
        let result = reg.dispatch(&call("boom", json!({"target": "x"}))).await;
        assert!(result.is_error());
        assert!(result.content.contains("executor exploded"));
    }

    #[tokio::test]
    async fn dispatch_rejects_missing_required_argument_before_execution() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FakeTool::failing("boom"))).unwrap();
        // The executor would fail, but the schema check fires first.
        let result = reg.dispatch(&call("boom", json!({}))).await;
        assert!(result.is_error());
        assert!(result.content.contains("missing required argument 'target'"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_an_error_result() {
        let reg = ToolRegistry::new();
        let result = reg.dispatch(&call("ghost", json!({}))).await;
        assert!(result.is_error());
        assert!(result.content.contains("not found"));
    }
}
