//! Cancellation mid-flight: the client cancels by progress token while the
//! server is waiting on its sampling request. Nothing gets applied.

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::common::McpProcess;
use crate::common::seed_stage;
use crate::common::stage_status;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_by_progress_token_aborts_the_apply() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    seed_stage(home.path(), "stage-cancel", "X").await?;

    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let call_id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "apply", "arguments": { "id": "stage-cancel" } })),
            Some(json!({ "progressToken": "tok" })),
        )
        .await?;

    let elicitation = mcp.read_request("elicitation/create").await?;
    let elicitation_id = elicitation["id"].clone();
    mcp.send_response(&elicitation_id, json!({ "choice": "confirm" }))
        .await?;

    // The sampling request goes out; instead of answering, cancel the
    // whole operation by its progress token.
    let _sampling = mcp.read_request("sampling/createMessage").await?;
    mcp.send_notification(
        "notifications/cancelled",
        Some(json!({ "progressToken": "tok" })),
    )
    .await?;

    // The server abandons its pending call and says so.
    let cancelled = mcp.read_notification("notifications/cancelled").await?;
    assert_eq!(cancelled["params"]["progressToken"], json!("tok"));

    // The tool call concludes with the structured cancellation error.
    let response = mcp.read_response(call_id).await?;
    let result = &response["result"];
    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["structuredContent"]["code"], json!(-32800));
    assert_eq!(
        result["structuredContent"]["message"],
        json!("Request cancelled")
    );

    assert_eq!(stage_status(home.path(), "stage-cancel").await?, "pending");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_cancellation_is_a_no_op() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    seed_stage(home.path(), "stage-twice", "X").await?;

    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let call_id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "apply", "arguments": { "id": "stage-twice" } })),
            Some(json!({ "progressToken": "tok2" })),
        )
        .await?;

    let elicitation = mcp.read_request("elicitation/create").await?;
    let elicitation_id = elicitation["id"].clone();

    // Two cancellations for the same key: the first wins, the second is
    // dropped on the floor.
    mcp.send_notification(
        "notifications/cancelled",
        Some(json!({ "requestId": call_id })),
    )
    .await?;
    mcp.send_notification(
        "notifications/cancelled",
        Some(json!({ "progressToken": "tok2" })),
    )
    .await?;
    // A late elicitation answer is also harmless.
    mcp.send_response(&elicitation_id, json!({ "choice": "confirm" }))
        .await?;

    let response = mcp.read_response(call_id).await?;
    let result = &response["result"];
    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["structuredContent"]["code"], json!(-32800));

    assert_eq!(stage_status(home.path(), "stage-twice").await?, "pending");

    Ok(())
}
