use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::ProgressToken;
use mcp_types::RequestId;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn classify_frames_by_shape() {
    let request: JSONRPCMessage = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": "abc",
        "method": "ping"
    }))
    .expect("request frame");
    assert!(matches!(request, JSONRPCMessage::Request(_)));

    let response: JSONRPCMessage = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 7,
        "result": {}
    }))
    .expect("response frame");
    assert!(matches!(response, JSONRPCMessage::Response(_)));

    let error: JSONRPCMessage = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 7,
        "error": { "code": -32601, "message": "Method not found: nope" }
    }))
    .expect("error frame");
    assert!(matches!(error, JSONRPCMessage::Error(_)));

    let notification: JSONRPCMessage = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized"
    }))
    .expect("notification frame");
    assert!(matches!(notification, JSONRPCMessage::Notification(_)));
}

#[test]
fn request_meta_carries_progress_token() {
    let msg: JSONRPCMessage = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": "apply", "arguments": { "id": "stg_1" } },
        "_meta": { "progressToken": "tok" }
    }))
    .expect("request with meta");

    let JSONRPCMessage::Request(req) = msg else {
        unreachable!()
    };
    let meta = req.meta.expect("meta must deserialize");
    assert_eq!(
        meta.progress_token,
        Some(ProgressToken::String("tok".to_string()))
    );
}

#[test]
fn parse_error_serializes_null_id() {
    let error = JSONRPCError {
        jsonrpc: "2.0".to_string(),
        id: None,
        error: JSONRPCErrorError {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        },
    };

    let value = serde_json::to_value(&error).expect("serialize error envelope");
    assert_eq!(
        value,
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": -32700, "message": "Parse error" }
        })
    );
}

#[test]
fn error_round_trips_with_integer_id() {
    let error = JSONRPCError {
        jsonrpc: "2.0".to_string(),
        id: Some(RequestId::Integer(42)),
        error: JSONRPCErrorError {
            code: -32800,
            message: "Request cancelled".to_string(),
            data: Some(json!({ "detail": "client went away" })),
        },
    };

    let text = serde_json::to_string(&error).expect("serialize");
    let parsed: JSONRPCMessage = serde_json::from_str(&text).expect("reparse");
    assert_eq!(parsed, JSONRPCMessage::Error(error));
}
