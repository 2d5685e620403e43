//! MCP server for the morfx transformation engine.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use morfx_core::Config;
use morfx_core::ConfigOverrides;
use morfx_core::provider::ProviderRegistry;
use morfx_core::safety::SafetyManager;
use morfx_core::staging::StagingManager;
use morfx_core::staging::store;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error_code;
pub(crate) mod message_processor;
mod outgoing_message;
mod prompts;
mod requests;
mod resources;
mod server_context;
mod session;
mod tools;

use crate::error_code::INVALID_REQUEST_ERROR_CODE;
use crate::error_code::PARSE_ERROR_CODE;
use crate::message_processor::MessageProcessor;
use crate::outgoing_message::OutgoingMessage;
use crate::outgoing_message::OutgoingMessageSender;
use crate::prompts::PromptRegistry;
use crate::resources::ResourceRegistry;
use crate::server_context::ServerContext;
use crate::tools::ToolRegistry;

/// Size of the bounded channel between the stdin reader and the processor.
/// 128 messages is plenty for an interactive agent connection.
const CHANNEL_CAPACITY: usize = 128;

/// How often expired stages are flipped and old transactions swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Inbound/outbound frame counters for observability.
#[derive(Debug, Default)]
pub struct TransportStats {
    inbound: AtomicU64,
    outbound: AtomicU64,
}

impl TransportStats {
    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outbound(&self) {
        self.outbound.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct ServerOptions {
    pub overrides: ConfigOverrides,
    /// Language providers; the server runs fine with none registered, the
    /// `query`/`transform` tools then answer LanguageNotFound.
    pub providers: ProviderRegistry,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            overrides: ConfigOverrides::default(),
            providers: ProviderRegistry::new(),
        }
    }
}

pub async fn run_main(options: ServerOptions) -> IoResult<()> {
    // Stdout belongs to the protocol; `tracing` goes to stderr and the log
    // level is controlled with `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load_with_overrides(options.overrides)
        .map_err(|e| std::io::Error::new(e.kind(), format!("error loading config: {e}")))?;

    let safety = Arc::new(SafetyManager::new(config.safety.clone()));
    // Crash recovery: restore any write that never reached a terminal
    // state.
    match safety.rollback_all() {
        Ok(0) => {}
        Ok(count) => info!("rolled back {count} interrupted transaction(s)"),
        Err(e) => error!("transaction recovery failed: {e}"),
    }

    let staging = if config.staging.enabled {
        let pool = store::open_pool(&config.db_path())
            .await
            .map_err(|e| std::io::Error::other(format!("error opening staging store: {e}")))?;
        Some(Arc::new(StagingManager::new(
            pool,
            config.staging.clone(),
            safety.clone(),
        )))
    } else {
        None
    };

    // Set up channels.
    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JSONRPCMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<OutgoingMessage>();
    let outgoing = Arc::new(OutgoingMessageSender::new(outgoing_tx));
    let stats = Arc::new(TransportStats::default());

    let ctx = Arc::new(ServerContext::new(
        config.clone(),
        options.providers,
        staging.clone(),
        safety.clone(),
        outgoing.clone(),
    ));
    let tools = Arc::new(ToolRegistry::builtin());
    let resources = Arc::new(ResourceRegistry::builtin(&ctx.config));
    let prompts = Arc::new(PromptRegistry::builtin());

    // Task: read newline-delimited JSON from stdin, classify, forward.
    let stdin_reader_handle = tokio::spawn({
        let outgoing = outgoing.clone();
        let stats = stats.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Some(line) = lines.next_line().await.unwrap_or_default() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JSONRPCMessage>(&line) {
                    Ok(msg) => {
                        stats.record_inbound();
                        if msg.jsonrpc_version() != JSONRPC_VERSION {
                            reject_bad_version(&outgoing, msg).await;
                            continue;
                        }
                        if incoming_tx.send(msg).await.is_err() {
                            // Receiver gone – nothing left to do.
                            break;
                        }
                    }
                    Err(e) => {
                        // The decoder is per line, so one bad frame never
                        // poisons the stream.
                        error!("failed to deserialize JSONRPCMessage: {e}");
                        outgoing
                            .send_error_without_id(JSONRPCErrorError {
                                code: PARSE_ERROR_CODE,
                                message: "Parse error".to_string(),
                                data: Some(json!({ "detail": e.to_string() })),
                            })
                            .await;
                    }
                }
            }

            debug!("stdin reader finished (EOF)");
        }
    });

    // Task: process incoming messages.
    let processor_handle = tokio::spawn({
        let mut processor = MessageProcessor::new(ctx, tools, resources, prompts);
        async move {
            while let Some(msg) = incoming_rx.recv().await {
                match msg {
                    JSONRPCMessage::Request(r) => processor.process_request(r).await,
                    JSONRPCMessage::Response(r) => processor.process_response(r).await,
                    JSONRPCMessage::Notification(n) => processor.process_notification(n).await,
                    JSONRPCMessage::Error(e) => processor.process_error(e).await,
                }
            }

            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing messages to stdout. This single writer is the
    // output mutex; frames leave in the order they were posted.
    let stdout_writer_handle = tokio::spawn({
        let stats = stats.clone();
        async move {
            let mut stdout = io::stdout();
            while let Some(outgoing_message) = outgoing_rx.recv().await {
                let msg: JSONRPCMessage = outgoing_message.into();
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if let Err(e) = stdout.write_all(json.as_bytes()).await {
                            error!("failed to write to stdout: {e}");
                            break;
                        }
                        if let Err(e) = stdout.write_all(b"\n").await {
                            error!("failed to write newline to stdout: {e}");
                            break;
                        }
                        if let Err(e) = stdout.flush().await {
                            error!("failed to flush stdout: {e}");
                            break;
                        }
                        stats.record_outbound();
                    }
                    Err(e) => error!("failed to serialize JSONRPCMessage: {e}"),
                }
            }

            info!("stdout writer exited (channel closed)");
        }
    });

    // Task: periodic retention work.
    let maintenance_handle = tokio::spawn({
        let staging = staging.clone();
        let safety = safety.clone();
        async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                if let Some(staging) = &staging {
                    match staging.cleanup_expired_stages().await {
                        Ok(0) => {}
                        Ok(count) => info!("expired {count} stage(s)"),
                        Err(e) => error!("stage cleanup failed: {e}"),
                    }
                }
                if let Err(e) = safety.sweep_transactions() {
                    error!("transaction sweep failed: {e}");
                }
            }
        }
    });

    // The tasks own their clones now; holding this one would keep the
    // outbound channel open and the writer alive past EOF.
    drop(outgoing);

    // The typical exit path is the stdin reader hitting EOF which, once it
    // drops `incoming_tx`, propagates shutdown to the processor and then to
    // the stdout task.
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);
    maintenance_handle.abort();
    info!(
        "connection closed: {} frame(s) in, {} frame(s) out",
        stats.inbound(),
        stats.outbound()
    );

    Ok(())
}

/// The codec only speaks JSON-RPC 2.0; anything else is InvalidRequest.
async fn reject_bad_version(outgoing: &Arc<OutgoingMessageSender>, msg: JSONRPCMessage) {
    let version = msg.jsonrpc_version().to_string();
    match msg {
        JSONRPCMessage::Request(request) => {
            outgoing
                .send_error(
                    request.id,
                    JSONRPCErrorError {
                        code: INVALID_REQUEST_ERROR_CODE,
                        message: format!("Invalid request: unsupported jsonrpc version {version:?}"),
                        data: None,
                    },
                )
                .await;
        }
        _ => {
            error!("dropping frame with unsupported jsonrpc version {version:?}");
        }
    }
}
