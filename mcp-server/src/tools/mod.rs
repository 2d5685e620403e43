//! Tool registry and the built-in tool set.
//!
//! Handlers are thin adapters: decode JSON params, call into providers /
//! staging / finalize, and shape a [`CallToolResult`]. Domain and safety
//! failures stay *inside* a successful JSON-RPC response as a structured
//! tool error; only unknown tool names and truly unexpected failures
//! escalate to JSON-RPC error envelopes.

mod apply;
mod query;
mod stages;
mod transform;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mcp_types::CallToolResult;
use mcp_types::ContentBlock;
use mcp_types::ProgressToken;
use mcp_types::TextContent;
use mcp_types::Tool;
use mcp_types::ToolAnnotations;
use morfx_core::MorfxErr;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::server_context::ServerContext;

/// Everything a handler may touch while it runs.
pub(crate) struct ToolContext {
    pub server: Arc<ServerContext>,
    pub cancel: CancellationToken,
    pub progress_token: Option<ProgressToken>,
}

impl ToolContext {
    /// Emit a progress frame when the call opted in via `progressToken`.
    pub(crate) async fn progress(&self, progress: f64, message: &str) {
        if let Some(token) = &self.progress_token {
            self.server
                .outgoing
                .send_progress(token, progress, Some(100.0), Some(message.to_string()))
                .await;
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<CallToolResult, MorfxErr>> + Send>>;
type ToolHandler = Box<dyn Fn(ToolContext, Option<serde_json::Value>) -> HandlerFuture + Send + Sync>;

pub(crate) struct ToolRegistry {
    definitions: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub(crate) fn builtin() -> Self {
        let mut registry = Self {
            definitions: Vec::new(),
            handlers: HashMap::new(),
        };
        registry.register(
            query::definition(),
            Box::new(|ctx, args| Box::pin(query::handle(ctx, args))),
        );
        registry.register(
            transform::definition(),
            Box::new(|ctx, args| Box::pin(transform::handle(ctx, args))),
        );
        registry.register(
            apply::definition(),
            Box::new(|ctx, args| Box::pin(apply::handle(ctx, args))),
        );
        registry.register(
            stages::definition(),
            Box::new(|ctx, args| Box::pin(stages::handle(ctx, args))),
        );
        registry
    }

    fn register(&mut self, definition: Tool, handler: ToolHandler) {
        self.handlers.insert(definition.name.clone(), handler);
        self.definitions.push(definition);
    }

    pub(crate) fn definitions(&self) -> Vec<Tool> {
        self.definitions.clone()
    }

    /// Run a tool. `None` is the unknown-name sentinel; the dispatcher
    /// turns it into JSON-RPC `-32601`.
    pub(crate) async fn dispatch(
        &self,
        name: &str,
        ctx: ToolContext,
        arguments: Option<serde_json::Value>,
    ) -> Option<CallToolResult> {
        let handler = self.handlers.get(name)?;
        let result = match handler(ctx, arguments).await {
            Ok(result) => result,
            Err(err) => tool_error_result(&err),
        };
        Some(result)
    }
}

pub(crate) fn parse_args<P: DeserializeOwned>(
    arguments: Option<serde_json::Value>,
) -> Result<P, MorfxErr> {
    serde_json::from_value(arguments.unwrap_or_else(|| json!({})))
        .map_err(|e| MorfxErr::InvalidParams(e.to_string()))
}

pub(crate) fn ok_result(text: impl Into<String>, structured: serde_json::Value) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text))],
        is_error: None,
        structured_content: Some(structured),
    }
}

/// Shape a domain error the way clients expect it: `isError` plus a
/// `{code, message, data}` body under the structured key.
pub(crate) fn tool_error_result(err: &MorfxErr) -> CallToolResult {
    let code = err.code();
    let message = match err {
        MorfxErr::Cancelled(_) => "Request cancelled".to_string(),
        other => other.to_string(),
    };
    let mut body = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = err.data() {
        body["data"] = data;
    }
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(message))],
        is_error: Some(true),
        structured_content: Some(body),
    }
}

pub(crate) fn input_schema_for<P: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(P)).unwrap_or_else(|_| json!({ "type": "object" }))
}

/// Every tool returns the same envelope; the machine-readable payload sits
/// under `structuredContent`.
pub(crate) fn call_tool_output_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": { "const": "text" },
                        "text": { "type": "string" }
                    },
                    "required": ["type", "text"]
                }
            },
            "isError": { "type": "boolean" },
            "structuredContent": { "type": "object" }
        },
        "required": ["content"]
    })
}

pub(crate) const STRUCTURED_KEY: &str = "structuredContent";

pub(crate) fn annotations(
    kind: &str,
    category: &str,
    scope: &str,
    scoped: bool,
    progress: bool,
) -> ToolAnnotations {
    ToolAnnotations {
        kind: Some(kind.to_string()),
        category: Some(category.to_string()),
        scope: Some(scope.to_string()),
        scoped: Some(scoped),
        stability: Some("stable".to_string()),
        audience: Some(vec!["assistant".to_string()]),
        progress: Some(progress),
    }
}
