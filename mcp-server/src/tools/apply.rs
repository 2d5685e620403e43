//! `apply`: commit staged transformations, gated by a user confirmation
//! elicitation, then ask the client's model for a one-line summary.

use mcp_types::CallToolResult;
use mcp_types::ContentBlock;
use mcp_types::CreateMessageRequestParams;
use mcp_types::ElicitRequestParamsRequestedSchema;
use mcp_types::LoggingLevel;
use mcp_types::Role;
use mcp_types::SamplingMessage;
use mcp_types::TextContent;
use mcp_types::Tool;
use morfx_core::MorfxErr;
use morfx_core::safety::FileCheck;
use morfx_core::safety::SafetyOperation;
use morfx_core::staging::Stage;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use super::STRUCTURED_KEY;
use super::ToolContext;
use super::annotations;
use super::call_tool_output_schema;
use super::input_schema_for;
use super::ok_result;
use super::parse_args;

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct ApplyToolParams {
    /// Stage to apply. When absent, every pending stage of the session is
    /// applied.
    #[serde(default)]
    pub id: Option<String>,
}

/// Conforms to `ElicitRequestParams`; the `morfx_*` fields let the client
/// correlate the confirmation with the tool call.
#[derive(Debug, Serialize)]
struct ApplyElicitRequestParams {
    pub message: String,
    #[serde(rename = "requestedSchema")]
    pub requested_schema: ElicitRequestParamsRequestedSchema,
    pub morfx_elicitation: String,
    pub morfx_session_id: String,
    pub morfx_stage_ids: Vec<String>,
}

pub(crate) fn definition() -> Tool {
    Tool {
        name: "apply".to_string(),
        title: Some("Apply staged transformations".to_string()),
        description: Some(
            "Commit one pending stage by id, or all pending stages for this session. Asks the \
             user for confirmation first when the client supports elicitation."
                .to_string(),
        ),
        input_schema: input_schema_for::<ApplyToolParams>(),
        output_schema: Some(call_tool_output_schema()),
        structured_key: Some(STRUCTURED_KEY.to_string()),
        annotations: Some(annotations("write", "staging", "session", true, true)),
    }
}

pub(crate) async fn handle(
    ctx: ToolContext,
    arguments: Option<serde_json::Value>,
) -> Result<CallToolResult, MorfxErr> {
    let params: ApplyToolParams = parse_args(arguments)?;
    let staging = ctx
        .server
        .staging
        .clone()
        .ok_or_else(|| MorfxErr::Internal("staging is disabled on this server".to_string()))?;

    let (mode, targets): (&str, Vec<Stage>) = match &params.id {
        Some(id) => ("single", vec![staging.get_stage(id).await?]),
        None => (
            "all",
            staging.list_pending_stages(&ctx.server.session_id).await?,
        ),
    };
    if targets.is_empty() {
        return Ok(ok_result(
            "No pending stages for this session.",
            json!({ "mode": mode, "applied": [] }),
        ));
    }
    let stage_ids: Vec<String> = targets.iter().map(|s| s.id.clone()).collect();

    // The whole batch must clear the safety limits before anyone is asked
    // to confirm it.
    let file_checks: Vec<FileCheck> = targets
        .iter()
        .filter_map(|stage| {
            stage.scope_file_path().map(|path| FileCheck {
                path,
                size: stage.modified.len() as u64,
                confidence: stage.confidence_score,
            })
        })
        .collect();
    if !file_checks.is_empty() {
        let global_confidence = file_checks
            .iter()
            .map(|f| f.confidence)
            .fold(f64::INFINITY, f64::min);
        ctx.server.safety.validate_operation(&SafetyOperation {
            files: file_checks,
            global_confidence,
        })?;
    }

    // Confirmation gate. A client without the elicitation capability
    // produces `None`, and the apply proceeds without the gate.
    ctx.progress(25.0, "awaiting confirmation").await;
    let elicit_params = ApplyElicitRequestParams {
        message: confirmation_message(&targets),
        requested_schema: ElicitRequestParamsRequestedSchema {
            r#type: "object".to_string(),
            properties: json!({
                "choice": {
                    "type": "string",
                    "enum": ["confirm", "reject"],
                }
            }),
            required: Some(vec!["choice".to_string()]),
        },
        morfx_elicitation: "apply-confirmation".to_string(),
        morfx_session_id: ctx.server.session_id.clone(),
        morfx_stage_ids: stage_ids.clone(),
    };
    let elicit_params = serde_json::to_value(&elicit_params)
        .map_err(|e| MorfxErr::Internal(format!("serializing elicitation params: {e}")))?;
    let confirmation = ctx
        .server
        .request_elicitation(&ctx.cancel, ctx.progress_token.as_ref(), elicit_params)
        .await?;
    let mut notes = Vec::new();
    match &confirmation {
        None => notes.push("Client lacks elicitation; applied without confirmation.".to_string()),
        Some(value) if is_confirmed(value) => {}
        Some(_) => {
            return Ok(ok_result(
                "Apply declined by user; stages remain pending.",
                json!({ "mode": mode, "applied": [], "declined": true }),
            ));
        }
    }

    // Summary first, apply second: a cancellation that lands while the
    // client is generating leaves every stage untouched.
    ctx.progress(50.0, "awaiting summary").await;
    let sampling = ctx
        .server
        .request_sampling(
            &ctx.cancel,
            ctx.progress_token.as_ref(),
            CreateMessageRequestParams {
                messages: vec![SamplingMessage {
                    role: Role::User,
                    content: ContentBlock::TextContent(TextContent::new(format!(
                        "Summarize in one short sentence: applying {} staged code \
                         transformation(s): {}.",
                        targets.len(),
                        stage_summaries(&targets).join("; ")
                    ))),
                }],
                max_tokens: 128,
                system_prompt: Some(
                    "You summarize code-change applications for an audit trail.".to_string(),
                ),
                temperature: None,
            },
        )
        .await?;

    ctx.progress(75.0, "applying").await;
    let mut applied = Vec::new();
    for stage in &targets {
        staging
            .apply_stage(&ctx.cancel, &stage.id, false, "apply_tool", None)
            .await?;
        applied.push(stage.id.clone());
    }

    ctx.server
        .notify_log(
            LoggingLevel::Info,
            json!({ "event": "stages_applied", "count": applied.len(), "ids": applied }),
        )
        .await;

    let mut text = format!("Applied {} stage(s).", applied.len());
    for note in notes.drain(..) {
        text.push(' ');
        text.push_str(&note);
    }

    Ok(ok_result(
        text,
        json!({
            "mode": mode,
            "applied": applied,
            "sampling": sampling.unwrap_or(serde_json::Value::Null),
        }),
    ))
}

fn confirmation_message(targets: &[Stage]) -> String {
    if let [stage] = targets {
        format!(
            "Apply staged transformation {} ({} {} on {})?",
            stage.id, stage.operation, stage.target_name, stage.language
        )
    } else {
        format!("Apply {} staged transformations?", targets.len())
    }
}

fn stage_summaries(targets: &[Stage]) -> Vec<String> {
    targets
        .iter()
        .map(|s| format!("{} ({} {} {})", s.id, s.language, s.operation, s.target_name))
        .collect()
}

/// Accept both the bare `{choice: "confirm"}` shape and the MCP
/// `{action: "accept", content: {...}}` shape.
fn is_confirmed(value: &serde_json::Value) -> bool {
    if value.get("choice").and_then(serde_json::Value::as_str) == Some("confirm") {
        return true;
    }
    if value.get("action").and_then(serde_json::Value::as_str) == Some("accept") {
        return true;
    }
    value
        .get("content")
        .is_some_and(|content| content.get("choice").and_then(serde_json::Value::as_str) == Some("confirm"))
}
