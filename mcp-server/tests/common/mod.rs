//! Test harness: spawns the real `morfx-mcp-server` binary and talks
//! newline-delimited JSON-RPC to it over stdio.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use assert_cmd::prelude::*;
use serde_json::Value;
use serde_json::json;
use std::process::Command as StdCommand;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct McpProcess {
    next_request_id: AtomicI64,
    /// Retain the child so it lives (and dies) with the harness.
    #[allow(dead_code)]
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl McpProcess {
    pub async fn new(morfx_home: &Path) -> anyhow::Result<Self> {
        let std_cmd = StdCommand::cargo_bin("morfx-mcp-server")
            .context("should find binary for morfx-mcp-server")?;
        let program = std_cmd.get_program().to_owned();

        let mut cmd = Command::new(program);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env("MORFX_HOME", morfx_home);
        cmd.env("RUST_LOG", "debug");

        let mut process = cmd
            .kill_on_drop(true)
            .spawn()
            .context("morfx-mcp-server proc should start")?;
        let stdin = process
            .stdin
            .take()
            .context("mcp should have stdin fd")?;
        let stdout = process
            .stdout
            .take()
            .context("mcp should have stdout fd")?;
        let stdout = BufReader::new(stdout);

        // Forward the child's stderr so failures are visible in test
        // output.
        if let Some(stderr) = process.stderr.take() {
            let mut stderr_reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = stderr_reader.next_line().await {
                    eprintln!("[mcp stderr] {line}");
                }
            });
        }

        Ok(Self {
            next_request_id: AtomicI64::new(0),
            process,
            stdin,
            stdout,
        })
    }

    /// Performs the initialization handshake, advertising elicitation and
    /// sampling capabilities.
    pub async fn initialize(&mut self) -> anyhow::Result<Value> {
        let id = self
            .send_request(
                "initialize",
                Some(json!({
                    "capabilities": { "elicitation": {}, "sampling": {}, "roots": {} },
                    "clientInfo": { "name": "morfx-test-client", "version": "0.1.0" },
                    "protocolVersion": "2025-06-18",
                })),
                None,
            )
            .await?;
        let response = self.read_response(id).await?;
        self.send_notification("notifications/initialized", None)
            .await?;
        Ok(response)
    }

    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
        meta: Option<Value>,
    ) -> anyhow::Result<i64> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            frame["params"] = params;
        }
        if let Some(meta) = meta {
            frame["_meta"] = meta;
        }
        self.write_line(&frame.to_string()).await?;
        Ok(id)
    }

    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> anyhow::Result<()> {
        let mut frame = json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            frame["params"] = params;
        }
        self.write_line(&frame.to_string()).await
    }

    /// Answer a server-initiated request (their ids are `srv-<n>` strings).
    pub async fn send_response(&mut self, id: &Value, result: Value) -> anyhow::Result<()> {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        });
        self.write_line(&frame.to_string()).await
    }

    pub async fn send_raw_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.write_line(line).await
    }

    async fn write_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    pub async fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut line = String::new();
        let read = timeout(DEFAULT_READ_TIMEOUT, self.stdout.read_line(&mut line))
            .await
            .context("timed out waiting for a frame")??;
        anyhow::ensure!(read > 0, "server closed stdout");
        Ok(serde_json::from_str(&line)?)
    }

    /// Read until the response (or error) for `id`, skipping everything
    /// else.
    pub async fn read_response(&mut self, id: i64) -> anyhow::Result<Value> {
        Ok(self.read_response_collecting(id).await?.0)
    }

    /// Like [`Self::read_response`], but also returns the frames that
    /// arrived before it (requests the harness chose not to answer,
    /// notifications, progress).
    pub async fn read_response_collecting(
        &mut self,
        id: i64,
    ) -> anyhow::Result<(Value, Vec<Value>)> {
        let mut seen = Vec::new();
        loop {
            let msg = self.read_message().await?;
            let is_reply = msg.get("id") == Some(&json!(id))
                && (msg.get("result").is_some() || msg.get("error").is_some());
            if is_reply {
                return Ok((msg, seen));
            }
            seen.push(msg);
        }
    }

    /// Read until a server-initiated request for `method` arrives.
    pub async fn read_request(&mut self, method: &str) -> anyhow::Result<Value> {
        loop {
            let msg = self.read_message().await?;
            if msg.get("method").and_then(Value::as_str) == Some(method)
                && msg.get("id").is_some()
            {
                return Ok(msg);
            }
        }
    }

    /// Read until a notification for `method` arrives.
    pub async fn read_notification(&mut self, method: &str) -> anyhow::Result<Value> {
        loop {
            let msg = self.read_message().await?;
            if msg.get("method").and_then(Value::as_str) == Some(method)
                && msg.get("id").is_none()
            {
                return Ok(msg);
            }
        }
    }
}

/// Seed a stage directly into the staging store before the server starts.
pub async fn seed_stage(morfx_home: &Path, stage_id: &str, content: &str) -> anyhow::Result<()> {
    use morfx_core::config::SafetyConfig;
    use morfx_core::config::StagingConfig;
    use morfx_core::safety::SafetyManager;
    use morfx_core::staging::Stage;
    use morfx_core::staging::StagingManager;
    use morfx_core::staging::store;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    let pool = store::open_pool(&morfx_home.join("morfx.db")).await?;
    let safety = Arc::new(SafetyManager::new(SafetyConfig {
        transaction_dir: morfx_home.join("transactions"),
        ..Default::default()
    }));
    let staging = StagingManager::new(pool.clone(), StagingConfig::default(), safety);

    staging
        .create_stage(
            &CancellationToken::new(),
            Stage {
                id: stage_id.to_string(),
                language: "go".to_string(),
                operation: "replace".to_string(),
                target_type: "function".to_string(),
                target_name: "main".to_string(),
                target_query: "{}".to_string(),
                original: String::new(),
                modified: content.to_string(),
                content: Some(content.to_string()),
                diff: String::new(),
                confidence_score: 0.9,
                confidence_level: "high".to_string(),
                confidence_factors: "[]".to_string(),
                scope_ast: "{}".to_string(),
                ..Default::default()
            },
        )
        .await?;
    pool.close().await;
    Ok(())
}

/// Fetch a stage's status straight from the store (works while the server
/// is running; WAL allows concurrent readers).
pub async fn stage_status(morfx_home: &Path, stage_id: &str) -> anyhow::Result<String> {
    use morfx_core::config::SafetyConfig;
    use morfx_core::config::StagingConfig;
    use morfx_core::safety::SafetyManager;
    use morfx_core::staging::StagingManager;
    use morfx_core::staging::store;
    use std::sync::Arc;

    let pool = store::open_pool(&morfx_home.join("morfx.db")).await?;
    let safety = Arc::new(SafetyManager::new(SafetyConfig {
        transaction_dir: morfx_home.join("transactions"),
        ..Default::default()
    }));
    let staging = StagingManager::new(pool.clone(), StagingConfig::default(), safety);
    let stage = staging.get_stage(stage_id).await?;
    pool.close().await;
    Ok(stage.status)
}
