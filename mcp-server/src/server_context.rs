//! The capability surface handed to tool handlers. Tools depend on this
//! narrow struct (providers, staging, safety, finalize, session state and
//! the server-initiated call helpers), never on the server internals, which
//! keeps the server ↔ registry ↔ handler cycle broken.

use std::sync::Arc;

use mcp_types::CreateMessageRequest;
use mcp_types::CreateMessageRequestParams;
use mcp_types::ElicitRequest;
use mcp_types::ListRootsRequest;
use mcp_types::ListRootsResult;
use mcp_types::LoggingLevel;
use mcp_types::LoggingMessageNotification;
use mcp_types::LoggingMessageNotificationParams;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::ProgressToken;
use mcp_types::RequestMeta;
use mcp_types::Root;
use morfx_core::Config;
use morfx_core::MorfxErr;
use morfx_core::finalize::TransformFinalizer;
use morfx_core::provider::ProviderRegistry;
use morfx_core::safety::SafetyManager;
use morfx_core::staging::StagingManager;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error_code::METHOD_NOT_FOUND_ERROR_CODE;
use crate::outgoing_message::OutgoingMessageSender;
use crate::session::SessionState;

pub(crate) struct ServerContext {
    pub config: Config,
    pub providers: ProviderRegistry,
    pub staging: Option<Arc<StagingManager>>,
    pub safety: Arc<SafetyManager>,
    pub finalizer: TransformFinalizer,
    pub session_id: String,
    pub session: Arc<Mutex<SessionState>>,
    pub outgoing: Arc<OutgoingMessageSender>,
}

impl ServerContext {
    pub(crate) fn new(
        config: Config,
        providers: ProviderRegistry,
        staging: Option<Arc<StagingManager>>,
        safety: Arc<SafetyManager>,
        outgoing: Arc<OutgoingMessageSender>,
    ) -> Self {
        let finalizer =
            TransformFinalizer::new(config.staging.clone(), staging.clone(), safety.clone());
        Self {
            config,
            providers,
            staging,
            safety,
            finalizer,
            session_id: format!("ses_{}", uuid::Uuid::new_v4().simple()),
            session: Arc::new(Mutex::new(SessionState::default())),
            outgoing,
        }
    }

    /// Ask the client (user) to confirm or choose. `Ok(None)` means the
    /// client lacks the elicitation capability and the caller should fall
    /// back.
    pub(crate) async fn request_elicitation(
        &self,
        cancel: &CancellationToken,
        progress_token: Option<&ProgressToken>,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, MorfxErr> {
        let result = self
            .server_request(cancel, progress_token, ElicitRequest::METHOD, params.clone())
            .await?;
        if let Some(result_value) = &result {
            let mut session = self.session.lock().await;
            session.record_elicitation(params, result_value.clone());
        }
        Ok(result)
    }

    /// Ask the client to generate content through its attached model.
    pub(crate) async fn request_sampling(
        &self,
        cancel: &CancellationToken,
        progress_token: Option<&ProgressToken>,
        params: CreateMessageRequestParams,
    ) -> Result<Option<serde_json::Value>, MorfxErr> {
        let params_value = serde_json::to_value(&params)
            .map_err(|e| MorfxErr::Internal(format!("serializing sampling params: {e}")))?;
        let result = self
            .server_request(
                cancel,
                progress_token,
                CreateMessageRequest::METHOD,
                params_value.clone(),
            )
            .await?;
        if let Some(result_value) = &result {
            let mut session = self.session.lock().await;
            session.record_sampling(params_value, result_value.clone());
        }
        Ok(result)
    }

    /// Fetch the client's filesystem roots and remember them in the
    /// session.
    pub(crate) async fn refresh_roots(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Root>>, MorfxErr> {
        let result = self
            .server_request(cancel, None, ListRootsRequest::METHOD, serde_json::json!({}))
            .await?;
        let Some(value) = result else {
            return Ok(None);
        };
        let roots = serde_json::from_value::<ListRootsResult>(value)
            .map(|r| r.roots)
            .unwrap_or_default();
        let mut session = self.session.lock().await;
        session.client_roots = roots.clone();
        Ok(Some(roots))
    }

    /// Emit a `notifications/message` frame, gated by the session's logging
    /// level.
    pub(crate) async fn notify_log(&self, level: LoggingLevel, data: serde_json::Value) {
        let should_emit = {
            let session = self.session.lock().await;
            session.should_emit(level)
        };
        if should_emit {
            self.outgoing
                .send_notification::<LoggingMessageNotification>(
                    LoggingMessageNotificationParams {
                        level,
                        logger: Some("morfx".to_string()),
                        data,
                    },
                )
                .await;
        }
    }

    /// Issue one server-initiated request and wait for the client, racing
    /// the caller's cancellation. On cancellation the parked slot is
    /// removed and a `notifications/cancelled` goes out carrying the
    /// request id and progress token.
    async fn server_request(
        &self,
        cancel: &CancellationToken,
        progress_token: Option<&ProgressToken>,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, MorfxErr> {
        if cancel.is_cancelled() {
            return Err(MorfxErr::Cancelled(format!("{method} aborted")));
        }

        let meta = progress_token.map(|token| RequestMeta {
            progress_token: Some(token.clone()),
            extra: Default::default(),
        });
        let (id, waiter) = self
            .outgoing
            .send_request(method, Some(params), meta)
            .await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.outgoing.discard_pending(&id).await;
                self.outgoing
                    .send_cancelled(
                        Some(id),
                        progress_token.cloned(),
                        Some(format!("{method} cancelled")),
                    )
                    .await;
                Err(MorfxErr::Cancelled(format!("{method} aborted")))
            }
            delivered = waiter => match delivered {
                Ok(Ok(value)) => Ok(Some(value)),
                // The client answered "method not found": it lacks the
                // capability; callers fall back instead of failing.
                Ok(Err(err)) if err.code == METHOD_NOT_FOUND_ERROR_CODE => Ok(None),
                Ok(Err(err)) => Err(MorfxErr::Internal(format!(
                    "client rejected {method}: {} ({})",
                    err.message, err.code
                ))),
                Err(_) => Err(MorfxErr::Internal(format!(
                    "connection closed while awaiting {method}"
                ))),
            }
        }
    }
}
