//! Tests for agentloop-llm: request types, delta accumulation, scripted decision-maker

use agentloop_core::{Message, ToolCallRequest};
use agentloop_llm::*;
use futures::StreamExt;
use serde_json::json;

async fn collect(stream: DecisionStream) -> (Decision, Vec<String>, Option<DecisionError>) {
    let mut acc = DecisionAccumulator::new();
    let mut forwarded = Vec::new();
    let mut error = None;
    tokio::pin!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => forwarded.extend(acc.push(delta)),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    (acc.finish(), forwarded, error)
}

// ===========================================================================
// DecisionRequest / ToolChoice
// ===========================================================================

#[test]
fn decision_request_default() {
    let req = DecisionRequest::default();
    assert!(req.messages.is_empty());
    assert!(req.tools.is_empty());
    assert!(req.system.is_none());
    assert_eq!(req.tool_choice, ToolChoice::Auto);
}

#[test]
fn decision_request_last_user_message() {
    let req = DecisionRequest {
        messages: vec![
            Message::user("what's the revenue for Lyft"),
            Message::assistant("$4B"),
            Message::user("and for Uber"),
            Message::assistant("checking"),
        ],
        ..Default::default()
    };
    assert_eq!(req.last_user_message(), Some("and for Uber"));
}

#[test]
fn tool_choice_serde() {
    assert_eq!(serde_json::to_string(&ToolChoice::Auto).unwrap(), r#""auto""#);
    assert_eq!(serde_json::to_string(&ToolChoice::Required).unwrap(), r#""required""#);
    let named: ToolChoice = serde_json::from_str(r#"{"named":"search"}"#).unwrap();
    assert_eq!(named, ToolChoice::Named("search".into()));
}

#[test]
fn tool_definition_serde() {
    let def = ToolDefinition {
        name: "search".into(),
        description: "Search the web".into(),
        input_schema: json!({"type": "object", "properties": {}}),
    };
    let json = serde_json::to_string(&def).unwrap();
    let back: ToolDefinition = serde_json::from_str(&json).unwrap();
    assert_eq!(back, def);
}

// ===========================================================================
// AccumulatedToolCall / DecisionAccumulator
// ===========================================================================

#[test]
fn accumulated_tool_call_parse_valid() {
    let tc = AccumulatedToolCall {
        id: "tc-1".into(),
        name: "send_hello".into(),
        arguments: r#"{"destination":"Karen"}"#.into(),
    };
    assert_eq!(tc.parse_arguments().unwrap()["destination"], "Karen");
    let req = tc.into_request();
    assert_eq!(req.id, "tc-1");
    assert_eq!(req.tool_name, "send_hello");
}

#[test]
fn accumulated_tool_call_empty_arguments_become_object() {
    let tc = AccumulatedToolCall {
        id: "tc-1".into(),
        name: "now".into(),
        arguments: "  ".into(),
    };
    assert_eq!(tc.into_request().arguments, json!({}));
}

#[test]
fn accumulator_text_only_is_answer() {
    let mut acc = DecisionAccumulator::new();
    assert_eq!(acc.push(DecisionDelta::Text("Hello ".into())), Some("Hello ".into()));
    assert_eq!(acc.push(DecisionDelta::Text(String::new())), None);
    acc.push(DecisionDelta::Text("world".into()));
    acc.push(DecisionDelta::Done { stop_reason: Some("end_turn".into()) });
    assert_eq!(acc.stop_reason(), Some("end_turn"));
    assert_eq!(acc.finish(), Decision::Answer("Hello world".into()));
}

#[test]
fn accumulator_interleaved_argument_fragments() {
    let mut acc = DecisionAccumulator::new();
    acc.push(DecisionDelta::ToolCallStart { id: "a".into(), name: "one".into() });
    acc.push(DecisionDelta::ToolCallStart { id: "b".into(), name: "two".into() });
    acc.push(DecisionDelta::ToolCallDelta { id: "a".into(), arguments: r#"{"n":"#.into() });
    acc.push(DecisionDelta::ToolCallDelta { id: "b".into(), arguments: r#"{"n":2}"#.into() });
    acc.push(DecisionDelta::ToolCallDelta { id: "a".into(), arguments: "1}".into() });
    let decision = acc.finish();
    assert_eq!(decision.tool_calls()[0].arguments, json!({"n": 1}));
    assert_eq!(decision.tool_calls()[1].arguments, json!({"n": 2}));
}

// ===========================================================================
// Decision::into_stream
// ===========================================================================

#[tokio::test]
async fn whole_decision_replays_through_accumulator() {
    let original = Decision::ToolCalls {
        text: "Looking it up.".into(),
        calls: vec![ToolCallRequest::new("c1", "search", json!({"q": "uber"}))],
    };
    let (decision, forwarded, error) = collect(original.clone().into_stream()).await;
    assert!(error.is_none());
    assert_eq!(forwarded, vec!["Looking it up.".to_string()]);
    assert_eq!(decision, original);
}

// ===========================================================================
// ScriptedDecisionMaker
// ===========================================================================

#[tokio::test]
async fn scripted_text_streams_in_chunks() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::text("a".repeat(45)));
    let stream = dm
        .decide(DecisionRequest::default(), CancellationToken::new())
        .await
        .unwrap();
    let (decision, forwarded, _) = collect(stream).await;
    assert_eq!(forwarded.len(), 3);
    assert_eq!(decision, Decision::Answer("a".repeat(45)));
    assert_eq!(dm.call_count().await, 1);
    assert_eq!(dm.name(), "scripted");
}

#[tokio::test]
async fn scripted_sequence_then_fallback() {
    let dm = ScriptedDecisionMaker::sequence(vec![
        ScriptedBehavior::tool_call("send_hello", json!({"destination": "Karen"})),
        ScriptedBehavior::text("second"),
    ]);

    let s = dm.decide(DecisionRequest::default(), CancellationToken::new()).await.unwrap();
    let (decision, _, _) = collect(s).await;
    assert_eq!(decision.tool_calls()[0].tool_name, "send_hello");
    assert_eq!(decision.tool_calls()[0].arguments["destination"], "Karen");

    let s = dm.decide(DecisionRequest::default(), CancellationToken::new()).await.unwrap();
    assert_eq!(collect(s).await.0, Decision::Answer("second".into()));

    let s = dm.decide(DecisionRequest::default(), CancellationToken::new()).await.unwrap();
    match collect(s).await.0 {
        Decision::Answer(t) => assert!(t.contains("sequence exhausted")),
        other => panic!("expected answer, got {:?}", other),
    }
    assert_eq!(dm.call_count().await, 3);
}

#[tokio::test]
async fn scripted_multi_tool_preserves_order() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::MultiToolCall(vec![
        ("search".into(), json!({"q": "a"})),
        ("browse".into(), json!({"url": "b"})),
    ]));
    let s = dm.decide(DecisionRequest::default(), CancellationToken::new()).await.unwrap();
    let (decision, _, _) = collect(s).await;
    let names: Vec<_> = decision.tool_calls().iter().map(|c| c.tool_name.clone()).collect();
    assert_eq!(names, vec!["search", "browse"]);
}

#[tokio::test]
async fn scripted_fail_is_returned_before_streaming() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::Fail(DecisionError::Unavailable(
        "connection refused".into(),
    )));
    let result = dm.decide(DecisionRequest::default(), CancellationToken::new()).await;
    match result {
        Err(e) => {
            assert!(e.is_retryable());
            assert!(e.to_string().contains("connection refused"));
        }
        Ok(_) => panic!("expected error"),
    }
}

#[tokio::test]
async fn scripted_fail_after_text() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::FailAfterText {
        text: "partial".into(),
        error: DecisionError::StreamError("reset".into()),
    });
    let s = dm.decide(DecisionRequest::default(), CancellationToken::new()).await.unwrap();
    let (_, forwarded, error) = collect(s).await;
    assert_eq!(forwarded, vec!["partial".to_string()]);
    assert_eq!(error, Some(DecisionError::StreamError("reset".into())));
}

#[tokio::test]
async fn scripted_stall_ends_on_cancel() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::Stall);
    let cancel = CancellationToken::new();
    let s = dm.decide(DecisionRequest::default(), cancel.clone()).await.unwrap();
    cancel.cancel();
    let (_, _, error) = collect(s).await;
    assert_eq!(error, Some(DecisionError::Cancelled));
}

#[tokio::test]
async fn scripted_respond_sees_request_and_records_it() {
    let dm = ScriptedDecisionMaker::constant(ScriptedBehavior::respond(|req| {
        ScriptedBehavior::text(format!("you said: {}", req.last_user_message().unwrap_or("")))
    }));
    let req = DecisionRequest {
        messages: vec![Message::user("ping")],
        ..Default::default()
    };
    let s = dm.decide(req, CancellationToken::new()).await.unwrap();
    assert_eq!(collect(s).await.0, Decision::Answer("you said: ping".into()));
    let recorded = dm.requests().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].messages[0].content, "ping");
}

// ===========================================================================
// DecisionError
// ===========================================================================

#[test]
fn decision_error_retry_classification() {
    assert!(DecisionError::Unavailable("x".into()).is_retryable());
    assert!(DecisionError::Timeout(100).is_retryable());
    assert!(DecisionError::RateLimited { retry_after_ms: 5 }.is_retryable());
    assert!(!DecisionError::AuthFailed("bad key".into()).is_retryable());
    assert!(!DecisionError::Cancelled.is_retryable());
    assert_eq!(DecisionError::RateLimited { retry_after_ms: 5 }.retry_after_ms(), Some(5));
    assert_eq!(DecisionError::Timeout(1).retry_after_ms(), None);
}
