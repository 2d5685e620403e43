//! `stages`: list this session's pending transformation proposals.

use mcp_types::CallToolResult;
use mcp_types::Tool;
use morfx_core::MorfxErr;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use super::STRUCTURED_KEY;
use super::ToolContext;
use super::annotations;
use super::call_tool_output_schema;
use super::input_schema_for;
use super::ok_result;
use super::parse_args;

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct StagesToolParams {
    /// Include the full diff of each stage in the structured output.
    #[serde(default)]
    pub include_diff: bool,
}

pub(crate) fn definition() -> Tool {
    Tool {
        name: "stages".to_string(),
        title: Some("List pending stages".to_string()),
        description: Some(
            "List the pending transformation proposals staged in this session.".to_string(),
        ),
        input_schema: input_schema_for::<StagesToolParams>(),
        output_schema: Some(call_tool_output_schema()),
        structured_key: Some(STRUCTURED_KEY.to_string()),
        annotations: Some(annotations("read", "staging", "session", true, false)),
    }
}

pub(crate) async fn handle(
    ctx: ToolContext,
    arguments: Option<serde_json::Value>,
) -> Result<CallToolResult, MorfxErr> {
    let params: StagesToolParams = parse_args(arguments)?;
    let staging = ctx
        .server
        .staging
        .clone()
        .ok_or_else(|| MorfxErr::Internal("staging is disabled on this server".to_string()))?;

    let pending = staging.list_pending_stages(&ctx.server.session_id).await?;
    let listed: Vec<serde_json::Value> = pending
        .iter()
        .map(|stage| {
            let mut entry = json!({
                "id": stage.id,
                "language": stage.language,
                "operation": stage.operation,
                "target": { "type": stage.target_type, "name": stage.target_name },
                "confidence": {
                    "score": stage.confidence_score,
                    "level": stage.confidence_level,
                },
                "path": stage.scope_file_path(),
                "createdAt": stage.created_at,
                "expiresAt": stage.expires_at,
            });
            if params.include_diff {
                entry["diff"] = json!(stage.diff);
            }
            entry
        })
        .collect();

    Ok(ok_result(
        format!("{} pending stage(s) in this session.", listed.len()),
        json!({ "stages": listed }),
    ))
}
