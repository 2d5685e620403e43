//! Sends messages to the client and manages callbacks for server-initiated
//! requests. All frames funnel through one unbounded channel drained by the
//! stdout writer task, which is what serializes writes to the client.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use mcp_types::CancelledNotification;
use mcp_types::CancelledNotificationParams;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ProgressNotification;
use mcp_types::ProgressNotificationParams;
use mcp_types::ProgressToken;
use mcp_types::RequestId;
use mcp_types::RequestMeta;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error_code::INTERNAL_ERROR_CODE;

/// What a waiter on a server-initiated request eventually receives: the
/// client's `result` or its error object.
pub(crate) type PendingResult = std::result::Result<mcp_types::Result, JSONRPCErrorError>;

pub(crate) struct OutgoingMessageSender {
    next_request_id: AtomicI64,
    sender: mpsc::UnboundedSender<OutgoingMessage>,
    request_id_to_callback: Mutex<HashMap<RequestId, oneshot::Sender<PendingResult>>>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        Self {
            next_request_id: AtomicI64::new(0),
            sender,
            request_id_to_callback: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a `srv-<n>` id, park a single-capacity slot under it, then
    /// write the frame. The slot is parked before the write so a response
    /// arriving immediately cannot be lost.
    pub(crate) async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        meta: Option<RequestMeta>,
    ) -> (RequestId, oneshot::Receiver<PendingResult>) {
        let id = RequestId::String(format!(
            "srv-{}",
            self.next_request_id.fetch_add(1, Ordering::Relaxed)
        ));
        let (tx, rx) = oneshot::channel();
        {
            let mut request_id_to_callback = self.request_id_to_callback.lock().await;
            request_id_to_callback.insert(id.clone(), tx);
        }

        let outgoing_message = OutgoingMessage::Request(OutgoingRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
            meta,
        });
        let _ = self.sender.send(outgoing_message);
        (id, rx)
    }

    /// Resolve the waiter for a response frame from the client.
    pub(crate) async fn notify_client_response(&self, id: RequestId, result: mcp_types::Result) {
        self.deliver(id, Ok(result)).await;
    }

    /// Resolve the waiter for an error frame from the client.
    pub(crate) async fn notify_client_error(&self, id: RequestId, error: JSONRPCErrorError) {
        self.deliver(id, Err(error)).await;
    }

    async fn deliver(&self, id: RequestId, result: PendingResult) {
        let entry = {
            let mut request_id_to_callback = self.request_id_to_callback.lock().await;
            request_id_to_callback.remove_entry(&id)
        };

        match entry {
            Some((id, sender)) => {
                if sender.send(result).is_err() {
                    warn!("could not notify callback for {id:?}");
                }
            }
            None => {
                warn!("could not find callback for {id:?}");
            }
        }
    }

    /// Remove a parked slot without resolving it. Used by the cancellation
    /// path; dropping the sender closes the waiter's receiver.
    pub(crate) async fn discard_pending(&self, id: &RequestId) {
        let mut request_id_to_callback = self.request_id_to_callback.lock().await;
        request_id_to_callback.remove(id);
    }

    pub(crate) async fn send_response<T: Serialize>(&self, id: RequestId, response: T) {
        match serde_json::to_value(response) {
            Ok(result) => {
                let outgoing_message = OutgoingMessage::Response(OutgoingResponse { id, result });
                let _ = self.sender.send(outgoing_message);
            }
            Err(err) => {
                self.send_error(
                    id,
                    JSONRPCErrorError {
                        code: INTERNAL_ERROR_CODE,
                        message: format!("failed to serialize response: {err}"),
                        data: None,
                    },
                )
                .await;
            }
        }
    }

    pub(crate) async fn send_error(&self, id: RequestId, error: JSONRPCErrorError) {
        let outgoing_message = OutgoingMessage::Error(OutgoingError {
            id: Some(id),
            error,
        });
        let _ = self.sender.send(outgoing_message);
    }

    /// Error envelope with a literal null id, the reply to an unparseable
    /// frame.
    pub(crate) async fn send_error_without_id(&self, error: JSONRPCErrorError) {
        let outgoing_message = OutgoingMessage::Error(OutgoingError { id: None, error });
        let _ = self.sender.send(outgoing_message);
    }

    pub(crate) async fn send_notification<N>(&self, params: N::Params)
    where
        N: ModelContextProtocolNotification,
    {
        let params = match serde_json::to_value(params) {
            Ok(serde_json::Value::Null) => None,
            Ok(value) => Some(value),
            Err(err) => {
                warn!("failed to serialize notification params: {err}");
                return;
            }
        };
        let _ = self
            .sender
            .send(OutgoingMessage::Notification(OutgoingNotification {
                method: N::METHOD.to_string(),
                params,
            }));
    }

    pub(crate) async fn send_progress(
        &self,
        progress_token: &ProgressToken,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) {
        self.send_notification::<ProgressNotification>(ProgressNotificationParams {
            message,
            progress,
            progress_token: progress_token.clone(),
            total,
        })
        .await;
    }

    pub(crate) async fn send_cancelled(
        &self,
        request_id: Option<RequestId>,
        progress_token: Option<ProgressToken>,
        reason: Option<String>,
    ) {
        self.send_notification::<CancelledNotification>(CancelledNotificationParams {
            request_id,
            progress_token,
            reason,
        })
        .await;
    }
}

/// Outgoing message from the server to the client.
pub(crate) enum OutgoingMessage {
    Request(OutgoingRequest),
    Notification(OutgoingNotification),
    Response(OutgoingResponse),
    Error(OutgoingError),
}

impl From<OutgoingMessage> for JSONRPCMessage {
    fn from(val: OutgoingMessage) -> Self {
        use OutgoingMessage::*;
        match val {
            Request(OutgoingRequest {
                id,
                method,
                params,
                meta,
            }) => JSONRPCMessage::Request(JSONRPCRequest {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                method,
                params,
                meta,
            }),
            Notification(OutgoingNotification { method, params }) => {
                JSONRPCMessage::Notification(JSONRPCNotification {
                    jsonrpc: JSONRPC_VERSION.into(),
                    method,
                    params,
                    meta: None,
                })
            }
            Response(OutgoingResponse { id, result }) => {
                JSONRPCMessage::Response(JSONRPCResponse {
                    jsonrpc: JSONRPC_VERSION.into(),
                    id,
                    result,
                })
            }
            Error(OutgoingError { id, error }) => JSONRPCMessage::Error(JSONRPCError {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                error,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingNotification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingResponse {
    pub id: RequestId,
    pub result: mcp_types::Result,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutgoingError {
    pub id: Option<RequestId>,
    pub error: JSONRPCErrorError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_types::LoggingMessageNotification;
    use mcp_types::LoggingMessageNotificationParams;
    use mcp_types::LoggingLevel;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn request_ids_are_monotonic_srv_strings() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let sender = OutgoingMessageSender::new(tx);

        let (first, _rx1) = sender.send_request("roots/list", None, None).await;
        let (second, _rx2) = sender.send_request("roots/list", None, None).await;
        assert_eq!(first, RequestId::String("srv-0".to_string()));
        assert_eq!(second, RequestId::String("srv-1".to_string()));

        let frame: JSONRPCMessage = rx.recv().await.expect("frame").into();
        let JSONRPCMessage::Request(req) = frame else {
            panic!("expected request frame");
        };
        assert_eq!(req.method, "roots/list");
        assert_eq!(req.id, RequestId::String("srv-0".to_string()));
    }

    #[tokio::test]
    async fn response_resolves_parked_waiter_exactly_once() {
        let (tx, _rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let sender = OutgoingMessageSender::new(tx);

        let (id, waiter) = sender.send_request("elicitation/create", None, None).await;
        sender
            .notify_client_response(id.clone(), json!({ "choice": "confirm" }))
            .await;

        let delivered = waiter.await.expect("waiter resolved");
        assert_eq!(delivered, Ok(json!({ "choice": "confirm" })));

        // A second delivery for the same id finds no callback.
        sender.notify_client_response(id, json!({})).await;
    }

    #[tokio::test]
    async fn client_error_reaches_the_waiter() {
        let (tx, _rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let sender = OutgoingMessageSender::new(tx);

        let (id, waiter) = sender.send_request("sampling/createMessage", None, None).await;
        sender
            .notify_client_error(
                id,
                JSONRPCErrorError {
                    code: -32601,
                    message: "no sampling capability".to_string(),
                    data: None,
                },
            )
            .await;

        let delivered = waiter.await.expect("waiter resolved");
        assert_eq!(
            delivered,
            Err(JSONRPCErrorError {
                code: -32601,
                message: "no sampling capability".to_string(),
                data: None,
            })
        );
    }

    #[tokio::test]
    async fn discarded_waiter_observes_closure() {
        let (tx, _rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let sender = OutgoingMessageSender::new(tx);

        let (id, waiter) = sender.send_request("elicitation/create", None, None).await;
        sender.discard_pending(&id).await;
        assert!(waiter.await.is_err(), "slot must be closed");
    }

    #[tokio::test]
    async fn notifications_carry_method_and_params() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let sender = OutgoingMessageSender::new(tx);

        sender
            .send_notification::<LoggingMessageNotification>(LoggingMessageNotificationParams {
                level: LoggingLevel::Info,
                logger: Some("morfx".to_string()),
                data: json!("stage applied"),
            })
            .await;

        let frame: JSONRPCMessage = rx.recv().await.expect("frame").into();
        let JSONRPCMessage::Notification(notification) = frame else {
            panic!("expected notification frame");
        };
        assert_eq!(notification.method, "notifications/message");
        assert_eq!(
            notification.params,
            Some(json!({
                "level": "info",
                "logger": "morfx",
                "data": "stage applied",
            }))
        );
    }
}
