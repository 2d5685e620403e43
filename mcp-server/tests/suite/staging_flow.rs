//! End-to-end apply flow: elicitation confirmation, sampling summary, and
//! the committed apply, correlated through one progress token.

use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

use crate::common::McpProcess;
use crate::common::seed_stage;
use crate::common::stage_status;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn apply_with_confirmation_and_summary() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    seed_stage(home.path(), "stage-apply", "X").await?;

    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let call_id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "apply", "arguments": { "id": "stage-apply" } })),
            Some(json!({ "progressToken": "tok" })),
        )
        .await?;

    // The server asks the user to confirm, correlated via the progress
    // token.
    let elicitation = mcp.read_request("elicitation/create").await?;
    assert_eq!(elicitation["_meta"]["progressToken"], json!("tok"));
    assert!(
        elicitation["params"]["message"]
            .as_str()
            .expect("message")
            .contains("stage-apply")
    );
    let elicitation_id = elicitation["id"].clone();
    mcp.send_response(&elicitation_id, json!({ "choice": "confirm" }))
        .await?;

    // Then it asks the client's model for a one-line summary.
    let sampling = mcp.read_request("sampling/createMessage").await?;
    assert_eq!(sampling["_meta"]["progressToken"], json!("tok"));
    let sampling_id = sampling["id"].clone();
    mcp.send_response(&sampling_id, json!({ "summary": "approved" }))
        .await?;

    let (response, earlier) = mcp.read_response_collecting(call_id).await?;
    let result = &response["result"];
    assert!(result.get("isError").is_none() || result["isError"] == json!(false));
    assert_eq!(result["structuredContent"]["mode"], json!("single"));
    assert_eq!(
        result["structuredContent"]["sampling"]["summary"],
        json!("approved")
    );
    assert_eq!(
        result["structuredContent"]["applied"],
        json!(["stage-apply"])
    );

    // Progress frames for the token preceded the response, ending at
    // 100/100.
    let progress: Vec<&Value> = earlier
        .iter()
        .filter(|m| {
            m.get("method").and_then(Value::as_str) == Some("notifications/progress")
                && m["params"]["progressToken"] == json!("tok")
        })
        .collect();
    assert!(!progress.is_empty(), "expected progress frames");
    let last = progress.last().expect("at least one progress frame");
    assert_eq!(last["params"]["progress"], json!(100.0));
    assert_eq!(last["params"]["message"], json!("completed"));

    assert_eq!(stage_status(home.path(), "stage-apply").await?, "applied");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declined_confirmation_leaves_the_stage_pending() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    seed_stage(home.path(), "stage-declined", "X").await?;

    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let call_id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "apply", "arguments": { "id": "stage-declined" } })),
            None,
        )
        .await?;

    let elicitation = mcp.read_request("elicitation/create").await?;
    let elicitation_id = elicitation["id"].clone();
    mcp.send_response(&elicitation_id, json!({ "choice": "reject" }))
        .await?;

    let response = mcp.read_response(call_id).await?;
    let result = &response["result"];
    assert_eq!(result["structuredContent"]["declined"], json!(true));
    assert_eq!(result["structuredContent"]["applied"], json!([]));

    assert_eq!(
        stage_status(home.path(), "stage-declined").await?,
        "pending"
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capability_miss_falls_back_to_unconfirmed_apply() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    seed_stage(home.path(), "stage-fallback", "X").await?;

    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let call_id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "apply", "arguments": { "id": "stage-fallback" } })),
            None,
        )
        .await?;

    // The client answers "method not found" to both server-initiated
    // calls: it has neither elicitation nor sampling.
    let elicitation = mcp.read_request("elicitation/create").await?;
    mcp.send_raw_line(
        &json!({
            "jsonrpc": "2.0",
            "id": elicitation["id"],
            "error": { "code": -32601, "message": "elicitation not supported" },
        })
        .to_string(),
    )
    .await?;
    let sampling = mcp.read_request("sampling/createMessage").await?;
    mcp.send_raw_line(
        &json!({
            "jsonrpc": "2.0",
            "id": sampling["id"],
            "error": { "code": -32601, "message": "sampling not supported" },
        })
        .to_string(),
    )
    .await?;

    let response = mcp.read_response(call_id).await?;
    let result = &response["result"];
    assert!(result.get("isError").is_none() || result["isError"] == json!(false));
    assert_eq!(
        result["structuredContent"]["applied"],
        json!(["stage-fallback"])
    );
    assert_eq!(result["structuredContent"]["sampling"], json!(null));

    assert_eq!(
        stage_status(home.path(), "stage-fallback").await?,
        "applied"
    );

    Ok(())
}
