use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::common::McpProcess;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tools_list_exposes_schemas_and_annotations() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp.send_request("tools/list", None, None).await?;
    let response = mcp.read_response(id).await?;
    let tools = response["result"]["tools"].as_array().expect("tools array");

    let names: Vec<&str> = tools
        .iter()
        .map(|t| t["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["query", "transform", "apply", "stages"]);

    for tool in tools {
        assert!(tool["inputSchema"].is_object(), "input schema required");
        assert!(tool["outputSchema"].is_object(), "output schema required");
        assert_eq!(tool["structuredKey"], json!("structuredContent"));
        assert!(tool["annotations"]["kind"].is_string());
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_tool_maps_to_method_not_found() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "does-not-exist", "arguments": {} })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["error"]["code"], json!(-32601));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_language_is_a_structured_tool_error() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp
        .send_request(
            "tools/call",
            Some(json!({
                "name": "query",
                "arguments": {
                    "language": "cobol",
                    "target": { "type": "function", "name": "main" },
                    "source": "IDENTIFICATION DIVISION.",
                },
            })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;

    // Domain errors ride inside a *successful* JSON-RPC response.
    assert!(response.get("error").is_none());
    let result = &response["result"];
    assert_eq!(result["isError"], json!(true));
    assert_eq!(result["structuredContent"]["code"], json!(-32010));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stages_tool_reports_an_empty_session() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp
        .send_request(
            "tools/call",
            Some(json!({ "name": "stages", "arguments": {} })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    let result = &response["result"];
    assert!(result.get("isError").is_none());
    assert_eq!(result["structuredContent"]["stages"], json!([]));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resources_list_read_and_subscribe() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp.send_request("resources/list", None, None).await?;
    let response = mcp.read_response(id).await?;
    let uris: Vec<&str> = response["result"]["resources"]
        .as_array()
        .expect("resources")
        .iter()
        .map(|r| r["uri"].as_str().expect("uri"))
        .collect();
    assert!(uris.contains(&"morfx://server/info"));
    assert!(uris.contains(&"morfx://config/limits"));

    let id = mcp
        .send_request(
            "resources/read",
            Some(json!({ "uri": "morfx://server/info" })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    let text = response["result"]["contents"][0]["text"]
        .as_str()
        .expect("text");
    assert!(text.contains("morfx-mcp-server"));

    // Built-in static resources acknowledge subscribe without wiring.
    let id = mcp
        .send_request(
            "resources/subscribe",
            Some(json!({ "uri": "morfx://server/info" })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["result"], json!({}));

    let id = mcp
        .send_request(
            "resources/read",
            Some(json!({ "uri": "morfx://nope" })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["error"]["code"], json!(-32602));

    let id = mcp
        .send_request("resources/templates/list", None, None)
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(
        response["result"]["resourceTemplates"][0]["uriTemplate"],
        json!("morfx://stages/{stageId}")
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prompts_list_and_get() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp.send_request("prompts/list", None, None).await?;
    let response = mcp.read_response(id).await?;
    let names: Vec<&str> = response["result"]["prompts"]
        .as_array()
        .expect("prompts")
        .iter()
        .map(|p| p["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["review-stage", "plan-transform"]);

    let id = mcp
        .send_request(
            "prompts/get",
            Some(json!({
                "name": "review-stage",
                "arguments": { "stage_id": "stg_42" },
            })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    let text = response["result"]["messages"][0]["content"]["text"]
        .as_str()
        .expect("prompt text");
    assert!(text.contains("stg_42"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_level_accepts_a_new_minimum() -> anyhow::Result<()> {
    let home = TempDir::new()?;
    let mut mcp = McpProcess::new(home.path()).await?;
    mcp.initialize().await?;

    let id = mcp
        .send_request(
            "logging/setLevel",
            Some(json!({ "level": "error" })),
            None,
        )
        .await?;
    let response = mcp.read_response(id).await?;
    assert_eq!(response["result"], json!({}));

    Ok(())
}
