//! `query`: run a structural query against in-memory source or a file.

use std::time::Duration;

use mcp_types::CallToolResult;
use mcp_types::Tool;
use morfx_core::MorfxErr;
use morfx_core::provider::AgentQuery;
use morfx_core::provider::TargetSpec;
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

/// File-scope queries are bounded; a runaway provider should not pin the
/// connection.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub(crate) struct TargetParam {
    /// Node kind to address, e.g. `function`, `struct`, `method`.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Name of the node, exact match.
    pub name: String,
}

impl From<TargetParam> for TargetSpec {
    fn from(value: TargetParam) -> Self {
        TargetSpec {
            kind: value.r#type,
            name: value.name,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct QueryToolParams {
    /// Language of the source, e.g. `go`, `rust`.
    pub language: String,
    pub target: TargetParam,
    /// Source text to query. Mutually exclusive with `path`.
    #[serde(default)]
    pub source: Option<String>,
    /// File to read and query. Mutually exclusive with `source`.
    #[serde(default)]
    pub path: Option<String>,
    /// Maximum number of matches to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

pub(crate) fn definition() -> Tool {
    Tool {
        name: "query".to_string(),
        title: Some("Query source structure".to_string()),
        description: Some(
            "Find named nodes (functions, types, methods) in source code without modifying it."
                .to_string(),
        ),
        input_schema: input_schema_for::<QueryToolParams>(),
        output_schema: Some(call_tool_output_schema()),
        structured_key: Some(STRUCTURED_KEY.to_string()),
        annotations: Some(annotations("read", "analysis", "source", false, false)),
    }
}

pub(crate) async fn handle(
    ctx: ToolContext,
    arguments: Option<serde_json::Value>,
) -> Result<CallToolResult, MorfxErr> {
    let params: QueryToolParams = parse_args(arguments)?;
    let source = resolve_source(params.source.clone(), params.path.as_deref()).await?;
    let provider = ctx.server.providers.get(&params.language)?;

    let query = AgentQuery {
        target: params.target.clone().into(),
        limit: params.limit,
    };
    let result = {
        let source = source.clone();
        let query = query.clone();
        tokio::time::timeout(
            QUERY_TIMEOUT,
            tokio::task::spawn_blocking(move || provider.query(&source, &query)),
        )
        .await
        .map_err(|_| MorfxErr::Internal("query timed out".to_string()))?
        .map_err(|e| MorfxErr::Internal(format!("query task failed: {e}")))??
    };

    let count = result.matches.len();
    Ok(ok_result(
        format!(
            "{count} match(es) for {} {} in {}.",
            params.target.r#type, params.target.name, params.language
        ),
        json!({
            "language": params.language,
            "target": params.target,
            "matches": result.matches,
        }),
    ))
}

pub(crate) async fn resolve_source(
    source: Option<String>,
    path: Option<&str>,
) -> Result<String, MorfxErr> {
    match (source, path) {
        (Some(source), None) => Ok(source),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MorfxErr::fs(format!("reading {path}"), e)),
        (Some(_), Some(_)) => Err(MorfxErr::InvalidParams(
            "`source` and `path` are mutually exclusive".to_string(),
        )),
        (None, None) => Err(MorfxErr::InvalidParams(
            "one of `source` or `path` is required".to_string(),
        )),
    }
}
