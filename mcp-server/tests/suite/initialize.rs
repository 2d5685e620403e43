use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::common::McpProcess;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialize_negotiates_version_and_capabilities() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;

    let response = mcp.initialize().await?;
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], json!("2025-06-18"));
    assert_eq!(result["serverInfo"]["name"], json!("morfx-mcp-server"));
    assert_eq!(result["capabilities"]["tools"]["listChanged"], json!(true));
    assert_eq!(
        result["capabilities"]["resources"]["subscribe"],
        json!(true)
    );

    // ping answers an empty object.
    let ping_id = mcp.send_request("ping", None, None).await?;
    let ping = mcp.read_response(ping_id).await?;
    assert_eq!(ping["result"], json!({}));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_is_method_not_found() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp.send_request("morfx/does-not-exist", None, None).await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["error"]["code"], json!(-32601));
    assert!(
        response["error"]["message"]
            .as_str()
            .expect("message")
            .contains("morfx/does-not-exist")
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frame_yields_parse_error_with_null_id() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    mcp.send_raw_line("{this is not json").await?;
    // Skim past unrelated frames (e.g. the server's roots/list request)
    // until the error envelope arrives.
    let message = loop {
        let msg = mcp.read_message().await?;
        if msg.get("error").is_some() {
            break msg;
        }
    };
    assert_eq!(message["error"]["code"], json!(-32700));
    assert_eq!(message["id"], json!(null));

    // The decoder recovers; the connection keeps working.
    let ping_id = mcp.send_request("ping", None, None).await?;
    let ping = mcp.read_response(ping_id).await?;
    assert_eq!(ping["result"], json!({}));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_jsonrpc_version_is_invalid_request() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    mcp.send_raw_line(r#"{"jsonrpc":"1.0","id":99,"method":"ping"}"#)
        .await?;
    let message = loop {
        let msg = mcp.read_message().await?;
        if msg.get("error").is_some() {
            break msg;
        }
    };
    assert_eq!(message["error"]["code"], json!(-32600));
    assert_eq!(message["id"], json!(99));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialized_as_request_gets_empty_success() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    // Some peers send the initialized *notification* as a request; the
    // server answers an empty success instead of method-not-found.
    let id = mcp
        .send_request("notifications/initialized", None, None)
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["result"], json!({}));

    Ok(())
}
