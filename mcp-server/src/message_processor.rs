//! Routes inbound frames: typed dispatch for requests and notifications,
//! admission and teardown of per-request cancellation, and the progress
//! convention around `tools/call`.

use std::sync::Arc;

use mcp_types::CallToolRequestParams;
use mcp_types::ClientNotification;
use mcp_types::ClientRequest;
use mcp_types::ConversionError;
use mcp_types::GetPromptRequestParams;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::LATEST_PROTOCOL_VERSION;
use mcp_types::ListToolsResult;
use mcp_types::ProgressToken;
use mcp_types::ReadResourceRequestParams;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::ServerCapabilitiesPrompts;
use mcp_types::ServerCapabilitiesResources;
use mcp_types::ServerCapabilitiesTools;
use mcp_types::SetLevelRequestParams;
use mcp_types::SubscribeRequestParams;
use mcp_types::UnsubscribeRequestParams;
use serde_json::json;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::error_code::INVALID_PARAMS_ERROR_CODE;
use crate::error_code::METHOD_NOT_FOUND_ERROR_CODE;
use crate::error_code::REQUEST_CANCELLED_ERROR_CODE;
use crate::prompts::PromptRegistry;
use crate::requests::RequestRegistry;
use crate::resources::ResourceRegistry;
use crate::resources::SubscribeOutcome;
use crate::server_context::ServerContext;
use crate::tools::ToolContext;
use crate::tools::ToolRegistry;

/// Protocol revisions this server negotiates. The client's version is kept
/// when we know it; otherwise we answer with our latest.
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26"];

pub(crate) struct MessageProcessor {
    ctx: Arc<ServerContext>,
    requests: Arc<RequestRegistry>,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    prompts: Arc<PromptRegistry>,
}

impl MessageProcessor {
    pub(crate) fn new(
        ctx: Arc<ServerContext>,
        tools: Arc<ToolRegistry>,
        resources: Arc<ResourceRegistry>,
        prompts: Arc<PromptRegistry>,
    ) -> Self {
        Self {
            ctx,
            requests: Arc::new(RequestRegistry::default()),
            tools,
            resources,
            prompts,
        }
    }

    pub(crate) async fn process_request(&mut self, request: JSONRPCRequest) {
        let request_id = request.id.clone();
        let progress_token = request
            .meta
            .as_ref()
            .and_then(|meta| meta.progress_token.clone());

        let client_request = match ClientRequest::try_from(request) {
            Ok(client_request) => client_request,
            Err(ConversionError::UnknownMethod(method)) => {
                self.ctx
                    .outgoing
                    .send_error(
                        request_id,
                        JSONRPCErrorError {
                            code: METHOD_NOT_FOUND_ERROR_CODE,
                            message: format!("Method not found: {method}"),
                            data: None,
                        },
                    )
                    .await;
                return;
            }
            Err(ConversionError::InvalidParams { method, error }) => {
                self.ctx
                    .outgoing
                    .send_error(
                        request_id,
                        JSONRPCErrorError {
                            code: INVALID_PARAMS_ERROR_CODE,
                            message: format!("Invalid params for {method}: {error}"),
                            data: None,
                        },
                    )
                    .await;
                return;
            }
        };

        match client_request {
            ClientRequest::InitializeRequest(params) => {
                self.handle_initialize(request_id, params).await;
            }
            ClientRequest::PingRequest(params) => {
                tracing::info!("ping -> params: {params:?}");
                self.ctx.outgoing.send_response(request_id, json!({})).await;
            }
            ClientRequest::ListToolsRequest(params) => {
                tracing::trace!("tools/list -> {params:?}");
                self.ctx
                    .outgoing
                    .send_response(
                        request_id,
                        ListToolsResult {
                            tools: self.tools.definitions(),
                            next_cursor: None,
                        },
                    )
                    .await;
            }
            ClientRequest::CallToolRequest(params) => {
                self.handle_call_tool(request_id, params, progress_token).await;
            }
            ClientRequest::ListResourcesRequest(_) => {
                self.ctx
                    .outgoing
                    .send_response(
                        request_id,
                        mcp_types::ListResourcesResult {
                            resources: self.resources.list(),
                            next_cursor: None,
                        },
                    )
                    .await;
            }
            ClientRequest::ListResourceTemplatesRequest(_) => {
                self.ctx
                    .outgoing
                    .send_response(
                        request_id,
                        mcp_types::ListResourceTemplatesResult {
                            resource_templates: self.resources.templates(),
                            next_cursor: None,
                        },
                    )
                    .await;
            }
            ClientRequest::ReadResourceRequest(params) => {
                self.handle_read_resource(request_id, params).await;
            }
            ClientRequest::SubscribeRequest(params) => {
                self.handle_subscribe(request_id, params).await;
            }
            ClientRequest::UnsubscribeRequest(params) => {
                self.handle_unsubscribe(request_id, params).await;
            }
            ClientRequest::ListPromptsRequest(_) => {
                self.ctx
                    .outgoing
                    .send_response(
                        request_id,
                        mcp_types::ListPromptsResult {
                            prompts: self.prompts.list(),
                            next_cursor: None,
                        },
                    )
                    .await;
            }
            ClientRequest::GetPromptRequest(params) => {
                self.handle_get_prompt(request_id, params).await;
            }
            ClientRequest::SetLevelRequest(params) => {
                self.handle_set_level(request_id, params).await;
            }
            ClientRequest::InitializedRequest(_) => {
                // MCP treats `notifications/initialized` as a notification;
                // peers that send it as a request get an empty success.
                self.ctx.outgoing.send_response(request_id, json!({})).await;
            }
        }
    }

    /// Responses from the client resolve waiters on server-initiated calls.
    pub(crate) async fn process_response(&mut self, response: JSONRPCResponse) {
        tracing::info!("<- response: {response:?}");
        let JSONRPCResponse { id, result, .. } = response;
        self.ctx.outgoing.notify_client_response(id, result).await;
    }

    /// Error frames from the client reach the same waiters, so the
    /// capability-miss fallback can see `-32601`.
    pub(crate) async fn process_error(&mut self, err: JSONRPCError) {
        tracing::error!("<- error: {err:?}");
        if let Some(id) = err.id {
            self.ctx.outgoing.notify_client_error(id, err.error).await;
        }
    }

    pub(crate) async fn process_notification(&mut self, notification: JSONRPCNotification) {
        let client_notification = match ClientNotification::try_from(notification) {
            Ok(notification) => notification,
            Err(e) => {
                // Notifications are never answered; an unroutable one is
                // only logged.
                tracing::warn!("unhandled notification: {e}");
                return;
            }
        };

        match client_notification {
            ClientNotification::CancelledNotification(params) => {
                let hit = self
                    .requests
                    .cancel(params.request_id.as_ref(), params.progress_token.as_ref());
                tracing::info!(
                    "notifications/cancelled -> requestId: {:?}, progressToken: {:?}, delivered: {hit}",
                    params.request_id,
                    params.progress_token
                );
            }
            ClientNotification::InitializedNotification(_) => {
                tracing::info!("client initialized");
                self.spawn_roots_refresh();
            }
            ClientNotification::ProgressNotification(params) => {
                tracing::info!("notifications/progress -> params: {params:?}");
            }
            ClientNotification::RootsListChangedNotification(_) => {
                self.spawn_roots_refresh();
            }
        }
    }

    fn spawn_roots_refresh(&self) {
        let ctx = self.ctx.clone();
        task::spawn(async move {
            if let Err(e) = ctx.refresh_roots(&CancellationToken::new()).await {
                tracing::warn!("roots refresh failed: {e}");
            }
        });
    }

    async fn handle_initialize(&mut self, id: RequestId, params: InitializeRequestParams) {
        tracing::info!("initialize -> params: {params:?}");

        let negotiated = if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str())
        {
            params.protocol_version.clone()
        } else {
            LATEST_PROTOCOL_VERSION.to_string()
        };

        {
            let mut session = self.ctx.session.lock().await;
            if session.initialized {
                // A re-initialize starts the session over.
                session.reset();
            }
            session.initialized = true;
            session.protocol_version = Some(negotiated.clone());
            session.client_capabilities = Some(params.capabilities.clone());
        }

        let result = InitializeResult {
            capabilities: ServerCapabilities {
                completions: None,
                experimental: None,
                logging: Some(json!({})),
                prompts: Some(ServerCapabilitiesPrompts {
                    list_changed: Some(false),
                }),
                resources: Some(ServerCapabilitiesResources {
                    subscribe: Some(true),
                    list_changed: Some(true),
                }),
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(true),
                }),
            },
            instructions: Some(
                "Structural code transformations: query to inspect, transform to stage or \
                 auto-apply, stages to review, apply to commit."
                    .to_string(),
            ),
            protocol_version: negotiated,
            server_info: mcp_types::Implementation {
                name: "morfx-mcp-server".to_string(),
                title: Some("morfx".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                user_agent: None,
            },
        };
        self.ctx.outgoing.send_response(id, result).await;
    }

    async fn handle_call_tool(
        &mut self,
        id: RequestId,
        params: CallToolRequestParams,
        progress_token: Option<ProgressToken>,
    ) {
        tracing::info!("tools/call -> params: {params:?}");
        let CallToolRequestParams { name, arguments } = params;

        // Admission: a fresh cancellable context registered under the
        // request id and, when present, the progress token.
        let cancel = self.requests.register(&id, progress_token.as_ref());
        if let Some(token) = &progress_token {
            self.ctx
                .outgoing
                .send_progress(token, 0.0, Some(100.0), Some("queued".to_string()))
                .await;
        }

        let ctx = self.ctx.clone();
        let tools = self.tools.clone();
        let requests = self.requests.clone();

        // The handler runs in its own task so the dispatch loop never
        // blocks on tool work.
        task::spawn(async move {
            let tool_ctx = ToolContext {
                server: ctx.clone(),
                cancel: cancel.clone(),
                progress_token: progress_token.clone(),
            };
            let dispatched = tools.dispatch(&name, tool_ctx, arguments).await;

            let status = match &dispatched {
                Some(result) => {
                    if cancel.is_cancelled() || is_cancelled_result(result) {
                        "cancelled"
                    } else if result.is_error == Some(true) {
                        "failed"
                    } else {
                        "completed"
                    }
                }
                None => "failed",
            };
            // The response follows every progress frame this handler
            // produced.
            if let Some(token) = &progress_token {
                ctx.outgoing
                    .send_progress(token, 100.0, Some(100.0), Some(status.to_string()))
                    .await;
            }

            match dispatched {
                Some(result) => ctx.outgoing.send_response(id.clone(), result).await,
                None => {
                    ctx.outgoing
                        .send_error(
                            id.clone(),
                            JSONRPCErrorError {
                                code: METHOD_NOT_FOUND_ERROR_CODE,
                                message: format!("Method not found: {name}"),
                                data: None,
                            },
                        )
                        .await;
                }
            }

            requests.complete(&id);
        });
    }

    async fn handle_read_resource(&mut self, id: RequestId, params: ReadResourceRequestParams) {
        match self.resources.read(&params.uri) {
            Ok(result) => self.ctx.outgoing.send_response(id, result).await,
            Err(e) => {
                self.ctx
                    .outgoing
                    .send_error(
                        id,
                        JSONRPCErrorError {
                            code: INVALID_PARAMS_ERROR_CODE,
                            message: e.to_string(),
                            data: None,
                        },
                    )
                    .await;
            }
        }
    }

    async fn handle_subscribe(&mut self, id: RequestId, params: SubscribeRequestParams) {
        match self
            .resources
            .subscribe(&params.uri, self.ctx.outgoing.clone())
        {
            Ok(SubscribeOutcome::Acknowledged) => {
                self.ctx.outgoing.send_response(id, json!({})).await;
            }
            Ok(SubscribeOutcome::Subscribed(subscription_id)) => {
                self.ctx
                    .outgoing
                    .send_response(id, json!({ "subscriptionId": subscription_id }))
                    .await;
            }
            Err(e) => {
                self.ctx
                    .outgoing
                    .send_error(
                        id,
                        JSONRPCErrorError {
                            code: INVALID_PARAMS_ERROR_CODE,
                            message: e.to_string(),
                            data: None,
                        },
                    )
                    .await;
            }
        }
    }

    async fn handle_unsubscribe(&mut self, id: RequestId, params: UnsubscribeRequestParams) {
        let cancelled = self
            .resources
            .unsubscribe(&params.uri, params.subscription_id.as_deref());
        self.ctx
            .outgoing
            .send_response(id, json!({ "cancelled": cancelled }))
            .await;
    }

    async fn handle_get_prompt(&mut self, id: RequestId, params: GetPromptRequestParams) {
        match self.prompts.get(&params.name, params.arguments.as_ref()) {
            Ok(result) => self.ctx.outgoing.send_response(id, result).await,
            Err(e) => {
                self.ctx
                    .outgoing
                    .send_error(
                        id,
                        JSONRPCErrorError {
                            code: INVALID_PARAMS_ERROR_CODE,
                            message: e.to_string(),
                            data: None,
                        },
                    )
                    .await;
            }
        }
    }

    async fn handle_set_level(&mut self, id: RequestId, params: SetLevelRequestParams) {
        tracing::info!("logging/setLevel -> params: {params:?}");
        {
            let mut session = self.ctx.session.lock().await;
            session.logging_level = params.level;
        }
        self.ctx.outgoing.send_response(id, json!({})).await;
    }
}

fn is_cancelled_result(result: &mcp_types::CallToolResult) -> bool {
    result
        .structured_content
        .as_ref()
        .and_then(|body| body.get("code"))
        .and_then(serde_json::Value::as_i64)
        == Some(REQUEST_CANCELLED_ERROR_CODE)
}
