//! Tests for agentloop-core: ids, messages, tool-call types, events, errors

use agentloop_core::*;
use serde_json::json;

// ===========================================================================
// ContextId
// ===========================================================================

#[test]
fn context_id_new_and_display() {
    let id = ContextId::new("abc-123");
    assert_eq!(id.as_str(), "abc-123");
    assert_eq!(format!("{}", id), "abc-123");
}

#[test]
fn context_id_generate_is_unique() {
    let a = ContextId::generate();
    let b = ContextId::generate();
    assert_ne!(a, b);
    assert!(a.as_str().starts_with("ctx-"));
}

#[test]
fn context_id_serializes_as_plain_string() {
    let id = ContextId::new("session-1");
    assert_eq!(serde_json::to_string(&id).unwrap(), r#""session-1""#);
    let back: ContextId = serde_json::from_str(r#""session-1""#).unwrap();
    assert_eq!(back, id);
}

#[test]
fn generated_ids_have_prefixes() {
    assert!(new_run_id().starts_with("run-"));
    let call = new_tool_call_id();
    assert!(call.starts_with("call_"));
    assert_eq!(call.len(), "call_".len() + 12);
}

// ===========================================================================
// Role / Message
// ===========================================================================

#[test]
fn role_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
    assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), r#""tool""#);
}

#[test]
fn message_user_constructor() {
    let msg = Message::user("Hello");
    assert_eq!(msg.role, Role::User);
    assert_eq!(msg.content, "Hello");
    assert!(msg.tool_calls.is_none());
    assert!(!msg.is_error);
}

#[test]
fn message_assistant_with_tools() {
    let call = ToolCallRequest::new("c1", "search", json!({"q": "lyft revenue"}));
    let msg = Message::assistant_with_tools("Let me look.", vec![call.clone()]);
    assert_eq!(msg.role, Role::Assistant);
    assert!(msg.has_tool_calls());
    assert_eq!(msg.tool_calls.unwrap()[0], call);
}

#[test]
fn message_tool_result_carries_call_metadata() {
    let call = ToolCallRequest::new("c1", "search", json!({}));
    let result = ToolCallResult::failure(&call, ToolFailure::execution("down"));
    let msg = Message::tool_result(&result, result.to_content_string());
    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(msg.tool_name.as_deref(), Some("search"));
    assert!(msg.is_error);
    assert_eq!(msg.content, "Error: tool execution error: down");
}

#[test]
fn message_optional_fields_skipped() {
    let json = serde_json::to_string(&Message::user("hi")).unwrap();
    assert!(!json.contains("tool_calls"));
    assert!(!json.contains("tool_call_id"));
    assert!(!json.contains("is_error"));
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Message::user("hi"));
}

// ===========================================================================
// ToolOutput / ToolCallResult
// ===========================================================================

#[test]
fn tool_output_content_string() {
    assert_eq!(ToolOutput::text("hello").to_content_string(), "hello");
    let s = ToolOutput::Json(json!({"key": "value"})).to_content_string();
    assert!(s.contains("key"));
    assert!(s.contains("value"));
}

#[test]
fn tool_call_result_success() {
    let call = ToolCallRequest::new("c1", "send_hello", json!({"destination": "Karen"}));
    let result = ToolCallResult::success(&call, "sent".into());
    assert!(!result.is_error());
    assert!(result.error().is_none());
    assert_eq!(result.tool_name, "send_hello");
    assert_eq!(result.arguments, call.arguments);
    assert_eq!(result.to_content_string(), "sent");
}

#[test]
fn tool_call_result_serde_roundtrip() {
    let call = ToolCallRequest::new("c1", "send_hello", json!({"destination": "Karen"}));
    let result = ToolCallResult::failure(&call, ToolFailure::validation("missing message"));
    let json = serde_json::to_string(&result).unwrap();
    let back: ToolCallResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(back.error().unwrap().kind, ToolErrorKind::ArgumentValidation);
}

// ===========================================================================
// Event
// ===========================================================================

#[test]
fn event_terminal_classification() {
    assert!(!Event::delta("x").is_terminal());
    assert!(Event::final_answer("done").is_terminal());
    assert!(Event::from(RunError::Cancelled).is_terminal());
}

#[test]
fn event_serializes_with_type_tag() {
    let json = serde_json::to_value(Event::delta("hi")).unwrap();
    assert_eq!(json, json!({"type": "delta", "text": "hi"}));

    let err = serde_json::to_value(Event::from(RunError::Inconclusive { steps: 3 })).unwrap();
    assert_eq!(err["type"], "error");
    assert_eq!(err["error"]["kind"], "inconclusive");
    assert_eq!(err["error"]["steps"], 3);
}

#[test]
fn event_tool_call_started_mirrors_request() {
    let call = ToolCallRequest::new("c9", "browse", json!({"url": "https://example.com"}));
    match Event::tool_call_started(&call) {
        Event::ToolCallStarted { id, tool_name, arguments } => {
            assert_eq!(id, "c9");
            assert_eq!(tool_name, "browse");
            assert_eq!(arguments, call.arguments);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn event_kind_matches_tag() {
    for event in [
        Event::delta("a"),
        Event::final_answer("b"),
        Event::from(RunError::Cancelled),
    ] {
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn error_display() {
    assert_eq!(
        Error::duplicate_tool("search").to_string(),
        "duplicate tool: search"
    );
    assert_eq!(
        RunError::context_busy("ctx-1").to_string(),
        "context busy: ctx-1 is held by another run"
    );
    assert_eq!(
        RunError::decision_unavailable(4, "connection refused").to_string(),
        "decision unavailable after 4 attempt(s): connection refused"
    );
}

#[test]
fn run_error_converts_into_error() {
    let err: Error = RunError::Cancelled.into();
    assert_eq!(err.as_run_error(), Some(&RunError::Cancelled));
    assert_eq!(err.to_string(), "cancelled");
}

#[test]
fn error_from_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let err: Error = io_err.into();
    assert!(err.to_string().contains("missing"));
    assert!(err.as_run_error().is_none());
}

#[test]
fn tool_failure_unknown_tool_message() {
    let f = ToolFailure::unknown_tool("nope");
    assert_eq!(f.kind, ToolErrorKind::UnknownTool);
    assert_eq!(f.to_string(), "unknown tool: Tool not found: nope");
}
