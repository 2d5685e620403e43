//! `transform`: run a structural transformation and hand the result to the
//! finalize pipeline (stage, auto-apply, or report).

use std::path::PathBuf;
use std::time::Duration;

use mcp_types::CallToolResult;
use mcp_types::Tool;
use morfx_core::MorfxErr;
use morfx_core::finalize::FinalizeRequest;
use morfx_core::provider::TransformMethod;
use morfx_core::provider::TransformOp;
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
use super::query::TargetParam;
use super::query::resolve_source;

/// File transforms get a generous bound; see the query tool for the short
/// one.
const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OperationParam {
    Replace,
    Delete,
    InsertBefore,
    InsertAfter,
    Append,
}

impl From<OperationParam> for TransformMethod {
    fn from(value: OperationParam) -> Self {
        match value {
            OperationParam::Replace => TransformMethod::Replace,
            OperationParam::Delete => TransformMethod::Delete,
            OperationParam::InsertBefore => TransformMethod::InsertBefore,
            OperationParam::InsertAfter => TransformMethod::InsertAfter,
            OperationParam::Append => TransformMethod::Append,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct TransformToolParams {
    /// Language of the source, e.g. `go`, `rust`.
    pub language: String,
    pub operation: OperationParam,
    pub target: TargetParam,
    /// Replacement or inserted content, depending on the operation.
    #[serde(default)]
    pub content: Option<String>,
    /// Alternative replacement text for `replace` operations.
    #[serde(default)]
    pub replacement: Option<String>,
    /// Source text to transform. Mutually exclusive with `path`.
    #[serde(default)]
    pub source: Option<String>,
    /// File to transform in place (subject to staging and safety limits).
    #[serde(default)]
    pub path: Option<String>,
}

pub(crate) fn definition() -> Tool {
    Tool {
        name: "transform".to_string(),
        title: Some("Transform source structure".to_string()),
        description: Some(
            "Replace, delete, or insert around named nodes. High-confidence file transforms \
             auto-apply; everything else is staged for review."
                .to_string(),
        ),
        input_schema: input_schema_for::<TransformToolParams>(),
        output_schema: Some(call_tool_output_schema()),
        structured_key: Some(STRUCTURED_KEY.to_string()),
        annotations: Some(annotations("write", "transformation", "source", true, true)),
    }
}

pub(crate) async fn handle(
    ctx: ToolContext,
    arguments: Option<serde_json::Value>,
) -> Result<CallToolResult, MorfxErr> {
    let params: TransformToolParams = parse_args(arguments)?;
    if let Some(path) = &params.path {
        ensure_within_roots(&ctx, path).await?;
    }
    let original = resolve_source(params.source.clone(), params.path.as_deref()).await?;
    let provider = ctx.server.providers.get(&params.language)?;

    let method: TransformMethod = params.operation.into();
    let op = TransformOp {
        method,
        target: params.target.clone().into(),
        content: params.content.clone(),
        replacement: params.replacement.clone(),
    };

    ctx.progress(25.0, "transforming").await;
    let result = {
        let source = original.clone();
        let op = op.clone();
        tokio::time::timeout(
            TRANSFORM_TIMEOUT,
            tokio::task::spawn_blocking(move || provider.transform(&source, &op)),
        )
        .await
        .map_err(|_| MorfxErr::Internal("transform timed out".to_string()))?
        .map_err(|e| MorfxErr::Internal(format!("transform task failed: {e}")))??
    };
    if result.match_count == 0 {
        return Err(MorfxErr::NoMatches {
            target: format!("{} {}", params.target.r#type, params.target.name),
        });
    }

    ctx.progress(60.0, "finalizing").await;
    let response_text = format!(
        "{}: {} {} {}, {} match(es), confidence {:.2} ({}).",
        params.language,
        method,
        params.target.r#type,
        params.target.name,
        result.match_count,
        result.confidence.score,
        result.confidence.level,
    );
    let outcome = ctx
        .server
        .finalizer
        .finalize(
            &ctx.cancel,
            FinalizeRequest {
                language: params.language.clone(),
                operation: method,
                target: params.target.clone().into(),
                target_query: serde_json::to_value(&params.target)
                    .unwrap_or_else(|_| json!({})),
                path: params.path.as_deref().map(PathBuf::from),
                original_source: original,
                content: params.content.clone(),
                result,
                response_text,
                session_id: Some(ctx.server.session_id.clone()),
            },
        )
        .await?;

    Ok(ok_result(
        outcome.text.clone(),
        json!({
            "result": outcome.status.as_str(),
            "id": outcome.id,
            "modified": outcome.modified,
            "path": outcome.path,
            "confidence": outcome.confidence,
            "matches": outcome.matches,
        }),
    ))
}

/// When the client has announced roots, file writes stay inside them.
async fn ensure_within_roots(ctx: &ToolContext, path: &str) -> Result<(), MorfxErr> {
    let roots = {
        let session = ctx.server.session.lock().await;
        session.client_roots.clone()
    };
    if roots.is_empty() {
        return Ok(());
    }
    let absolute = std::path::absolute(path)
        .map_err(|e| MorfxErr::fs(format!("resolving {path}"), e))?;
    for root in &roots {
        if let Some(dir) = root.uri.strip_prefix("file://")
            && absolute.starts_with(dir)
        {
            return Ok(());
        }
    }
    Err(MorfxErr::InvalidParams(format!(
        "path {path} is outside the client's roots"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outgoing_message::OutgoingMessageSender;
    use crate::server_context::ServerContext;
    use morfx_core::Config;
    use morfx_core::ConfigOverrides;
    use morfx_core::provider::AgentQuery;
    use morfx_core::provider::Confidence;
    use morfx_core::provider::Provider;
    use morfx_core::provider::ProviderRegistry;
    use morfx_core::provider::QueryMatch;
    use morfx_core::provider::QueryResult;
    use morfx_core::provider::TransformResult;
    use morfx_core::safety::SafetyManager;
    use morfx_core::staging::StagingManager;
    use morfx_core::staging::store;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Replaces the target function's body wholesale; confidence comes from
    /// the constructor so tests choose the auto-apply outcome.
    struct FakeProvider {
        score: f64,
    }

    impl Provider for FakeProvider {
        fn language(&self) -> &'static str {
            "fake"
        }

        fn query(&self, source: &str, query: &AgentQuery) -> Result<QueryResult, MorfxErr> {
            let matches = if source.contains(&query.target.name) {
                vec![QueryMatch {
                    kind: query.target.kind.clone(),
                    name: query.target.name.clone(),
                    line: 1,
                    column: 1,
                    snippet: Some(source.lines().next().unwrap_or_default().to_string()),
                }]
            } else {
                Vec::new()
            };
            Ok(QueryResult { matches })
        }

        fn transform(&self, source: &str, op: &TransformOp) -> Result<TransformResult, MorfxErr> {
            if !source.contains(&op.target.name) {
                return Ok(TransformResult {
                    modified: source.to_string(),
                    diff: String::new(),
                    confidence: Confidence::from_score(self.score),
                    match_count: 0,
                    metadata: Default::default(),
                });
            }
            let replacement = op
                .replacement
                .clone()
                .or_else(|| op.content.clone())
                .unwrap_or_default();
            Ok(TransformResult {
                modified: replacement.clone(),
                diff: format!("-{source}\n+{replacement}"),
                confidence: Confidence::from_score(self.score),
                match_count: 1,
                metadata: Default::default(),
            })
        }
    }

    async fn context(score: f64, home: &std::path::Path) -> Arc<ServerContext> {
        let config = Config::load_with_overrides(ConfigOverrides {
            morfx_home: Some(home.to_path_buf()),
            transaction_dir: Some(home.join("tx")),
            lock_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        })
        .expect("config");
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(FakeProvider { score }));
        let safety = Arc::new(SafetyManager::new(config.safety.clone()));
        let pool = store::open_in_memory().await.expect("pool");
        let staging = Arc::new(StagingManager::new(
            pool,
            config.staging.clone(),
            safety.clone(),
        ));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let outgoing = Arc::new(OutgoingMessageSender::new(tx));
        Arc::new(ServerContext::new(
            config,
            providers,
            Some(staging),
            safety,
            outgoing,
        ))
    }

    fn tool_ctx(server: Arc<ServerContext>) -> ToolContext {
        ToolContext {
            server,
            cancel: CancellationToken::new(),
            progress_token: None,
        }
    }

    #[tokio::test]
    async fn high_confidence_file_transform_applies() {
        let home = tempfile::tempdir().expect("tempdir");
        let server = context(0.95, home.path()).await;

        let target = home.path().join("main.fake");
        std::fs::write(&target, "fn widget() {}").expect("seed");

        let result = handle(
            tool_ctx(server),
            Some(json!({
                "language": "fake",
                "operation": "replace",
                "target": { "type": "function", "name": "widget" },
                "content": "fn widget() { improved() }",
                "path": target.to_string_lossy(),
            })),
        )
        .await
        .expect("transform");

        assert_eq!(result.is_error, None);
        let body = result.structured_content.expect("structured");
        assert_eq!(body["result"], json!("applied"));
        assert_eq!(
            std::fs::read_to_string(&target).expect("read"),
            "fn widget() { improved() }"
        );
    }

    #[tokio::test]
    async fn low_confidence_transform_is_staged() {
        let home = tempfile::tempdir().expect("tempdir");
        let server = context(0.3, home.path()).await;

        let target = home.path().join("main.fake");
        std::fs::write(&target, "fn widget() {}").expect("seed");

        let result = handle(
            tool_ctx(server),
            Some(json!({
                "language": "fake",
                "operation": "replace",
                "target": { "type": "function", "name": "widget" },
                "content": "fn widget() { improved() }",
                "path": target.to_string_lossy(),
            })),
        )
        .await
        .expect("transform");

        let body = result.structured_content.expect("structured");
        assert_eq!(body["result"], json!("staged"));
        assert!(
            body["id"]
                .as_str()
                .expect("stage id")
                .starts_with("stg_")
        );
        assert_eq!(
            std::fs::read_to_string(&target).expect("read"),
            "fn widget() {}"
        );
    }

    #[tokio::test]
    async fn zero_matches_is_a_domain_error() {
        let home = tempfile::tempdir().expect("tempdir");
        let server = context(0.95, home.path()).await;

        let err = handle(
            tool_ctx(server),
            Some(json!({
                "language": "fake",
                "operation": "delete",
                "target": { "type": "function", "name": "missing" },
                "source": "fn widget() {}",
            })),
        )
        .await
        .expect_err("no matches");
        assert!(matches!(err, MorfxErr::NoMatches { .. }));
    }

    #[tokio::test]
    async fn unknown_language_is_a_domain_error() {
        let home = tempfile::tempdir().expect("tempdir");
        let server = context(0.95, home.path()).await;

        let err = handle(
            tool_ctx(server),
            Some(json!({
                "language": "cobol",
                "operation": "replace",
                "target": { "type": "function", "name": "widget" },
                "source": "IDENTIFICATION DIVISION.",
            })),
        )
        .await
        .expect_err("unknown language");
        assert!(matches!(err, MorfxErr::LanguageNotFound(_)));
    }
}
