//! Tests for agentloop-tools: argument schemas, contracts, registry, invoker pipeline

use agentloop_core::{Error, ToolCallRequest, ToolErrorKind, ToolFailure, ToolOutput};
use agentloop_tools::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn send_hello_schema() -> ArgumentSchema {
    ArgumentSchema::new()
        .required("destination", ParamType::String, "Who to greet")
        .param(
            ParamSpec::new("message", ParamType::String)
                .describe("Greeting text")
                .default_value(json!("hello")),
        )
}

fn send_hello() -> ToolContract {
    ToolContract::builder("send_hello")
        .description("Send a greeting to someone")
        .schema(send_hello_schema())
        .sync_handler(|args| {
            let to = args.str("destination").unwrap_or_default();
            let msg = args.str("message").unwrap_or_default();
            Ok(ToolOutput::text(format!("sent '{}' to {}", msg, to)))
        })
        .build()
        .unwrap()
}

fn call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new("call_1", name, args)
}

struct Echo;

#[async_trait::async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the input"
    }
    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().required("text", ParamType::String, "Text to echo")
    }
    async fn call(&self, args: ToolArgs, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(args.str("text").unwrap_or_default()))
    }
}

// ===========================================================================
// ArgumentSchema
// ===========================================================================

#[test]
fn schema_renders_json_schema() {
    let schema = send_hello_schema().deny_unknown_fields().to_json_schema();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["destination"]["type"], "string");
    assert_eq!(schema["properties"]["message"]["default"], "hello");
    assert_eq!(schema["required"], json!(["destination"]));
    assert_eq!(schema["additionalProperties"], json!(false));
}

#[test]
fn schema_fills_defaults() {
    let args = send_hello_schema()
        .validate(&json!({"destination": "Karen"}))
        .unwrap();
    assert_eq!(args.str("destination"), Some("Karen"));
    assert_eq!(args.str("message"), Some("hello"));
}

#[test]
fn schema_reports_every_problem() {
    let schema = ArgumentSchema::new()
        .required("a", ParamType::String, "")
        .required("b", ParamType::Integer, "");
    let err = schema.validate(&json!({"b": "not a number"})).unwrap_err();
    assert_eq!(err.problems.len(), 2);
    assert!(err.to_string().contains("missing required parameter 'a'"));
    assert!(err.to_string().contains("'b' expected integer, got string"));
}

#[test]
fn schema_coerces_scalars() {
    let schema = ArgumentSchema::new()
        .required("n", ParamType::Integer, "")
        .required("x", ParamType::Number, "")
        .required("flag", ParamType::Boolean, "");
    let args = schema
        .validate(&json!({"n": "42", "x": "1.5", "flag": "false"}))
        .unwrap();
    assert_eq!(args.i64("n"), Some(42));
    assert_eq!(args.f64("x"), Some(1.5));
    assert_eq!(args.bool("flag"), Some(false));
}

#[test]
fn schema_rejects_integer_outside_i64_range() {
    let schema = ArgumentSchema::new().required("n", ParamType::Integer, "");
    let err = schema.validate(&json!({"n": 1e30})).unwrap_err();
    assert_eq!(err.problems, vec!["'n' expected integer, got number".to_string()]);

    let args = schema.validate(&json!({"n": -4096.0})).unwrap();
    assert_eq!(args.i64("n"), Some(-4096));
}

#[test]
fn schema_parses_string_arguments() {
    let args = send_hello_schema()
        .validate(&json!(r#"{"destination":"Karen"}"#))
        .unwrap();
    assert_eq!(args.str("destination"), Some("Karen"));
}

#[test]
fn schema_treats_non_object_as_empty() {
    let schema = send_hello_schema();
    let err = schema.validate(&json!("{not json")).unwrap_err();
    assert_eq!(err.problems, vec!["missing required parameter 'destination'".to_string()]);

    let optional_only = ArgumentSchema::new().optional("q", ParamType::String, "");
    assert!(optional_only.validate(&json!([1, 2])).is_ok());
    assert!(optional_only.validate(&serde_json::Value::Null).is_ok());
}

#[test]
fn schema_unknown_fields() {
    let lenient = ArgumentSchema::new().optional("q", ParamType::String, "");
    let args = lenient.validate(&json!({"q": "a", "extra": 1})).unwrap();
    assert_eq!(args.i64("extra"), Some(1));

    let strict = lenient.deny_unknown_fields();
    let err = strict.validate(&json!({"q": "a", "extra": 1})).unwrap_err();
    assert_eq!(err.problems, vec!["unknown parameter 'extra'".to_string()]);
}

#[test]
fn schema_enum_and_pattern() {
    let schema = ArgumentSchema::new()
        .param(
            ParamSpec::new("unit", ParamType::String)
                .required()
                .one_of(vec![json!("c"), json!("f")]),
        )
        .param(
            ParamSpec::new("ticker", ParamType::String)
                .pattern("^[A-Z]{1,5}$")
                .unwrap(),
        );
    assert!(schema.validate(&json!({"unit": "c", "ticker": "UBER"})).is_ok());
    let err = schema.validate(&json!({"unit": "k", "ticker": "uber"})).unwrap_err();
    assert_eq!(err.problems.len(), 2);
    assert!(err.problems[0].contains("must be one of"));
    assert!(err.problems[1].contains("does not match pattern"));
}

#[test]
fn tool_args_parse_typed() {
    #[derive(Deserialize)]
    struct Hello {
        destination: String,
        message: String,
    }
    let args = send_hello_schema()
        .validate(&json!({"destination": "Karen", "message": "hi"}))
        .unwrap();
    let hello: Hello = args.parse().unwrap();
    assert_eq!(hello.destination, "Karen");
    assert_eq!(hello.message, "hi");
}

// ===========================================================================
// ToolContract / ToolRegistry
// ===========================================================================

#[test]
fn registry_rejects_duplicate_names() {
    let mut reg = ToolRegistry::new();
    reg.register(send_hello()).unwrap();
    match reg.register(send_hello()) {
        Err(Error::DuplicateTool { name }) => assert_eq!(name, "send_hello"),
        other => panic!("expected DuplicateTool, got {:?}", other),
    }
    assert_eq!(reg.len(), 1);
}

#[test]
fn registry_keeps_registration_order() {
    let mut reg = ToolRegistry::new();
    assert!(reg.is_empty());
    reg.register(send_hello()).unwrap();
    reg.register_tool(Echo).unwrap();
    assert_eq!(reg.list(), vec!["send_hello", "echo"]);

    let defs = reg.definitions();
    assert_eq!(defs[0].name, "send_hello");
    assert_eq!(defs[1].description, "Echo the input");
    assert_eq!(defs[1].input_schema["required"], json!(["text"]));
    assert!(reg.contains("echo"));
    assert!(reg.get("missing").is_none());
}

#[test]
fn contract_builder_validates() {
    let err = ToolContract::builder("").sync_handler(|_| Ok("x".into())).build().unwrap_err();
    assert!(matches!(err, Error::InvalidTool { .. }));

    let err = ToolContract::builder("has space")
        .sync_handler(|_| Ok("x".into()))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("has space"));

    let err = ToolContract::builder("no_handler").build().unwrap_err();
    assert!(err.to_string().contains("no handler"));
}

// ===========================================================================
// ToolInvoker
// ===========================================================================

#[tokio::test]
async fn invoke_success_fills_defaults() {
    let contract = send_hello();
    let req = call("send_hello", json!({"destination": "Karen"}));
    let result = ToolInvoker::default()
        .invoke(Some(&contract), &req, ToolContext::detached("call_1"))
        .await;
    assert!(!result.is_error());
    assert_eq!(result.tool_name, "send_hello");
    assert_eq!(result.arguments, json!({"destination": "Karen"}));
    assert_eq!(result.to_content_string(), "sent 'hello' to Karen");
}

#[tokio::test]
async fn invoke_unknown_tool() {
    let req = call("nope", json!({}));
    let result = ToolInvoker::default()
        .invoke(None, &req, ToolContext::detached("call_1"))
        .await;
    assert_eq!(result.error().unwrap().kind, ToolErrorKind::UnknownTool);
    assert!(result.to_content_string().contains("Tool not found: nope"));
}

#[tokio::test]
async fn invoke_validation_failure_does_not_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let contract = ToolContract::builder("counted")
        .schema(ArgumentSchema::new().required("n", ParamType::Integer, ""))
        .sync_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("ran".into())
        })
        .build()
        .unwrap();

    let result = ToolInvoker::default()
        .invoke(Some(&contract), &call("counted", json!({"n": "many"})), ToolContext::detached("c"))
        .await;
    assert_eq!(result.error().unwrap().kind, ToolErrorKind::ArgumentValidation);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invoke_wraps_tool_errors() {
    let contract = ToolContract::builder("fails")
        .sync_handler(|_| Err(ToolError::failed("upstream returned 503")))
        .build()
        .unwrap();
    let result = ToolInvoker::default()
        .invoke(Some(&contract), &call("fails", json!({})), ToolContext::detached("c"))
        .await;
    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ToolErrorKind::Execution);
    assert_eq!(failure.message, "upstream returned 503");
    assert_eq!(
        result.to_content_string(),
        "Error: tool execution error: upstream returned 503"
    );
}

#[tokio::test]
async fn invoke_catches_panics() {
    let contract = ToolContract::builder("panics")
        .handler(|_, _| async move {
            if true {
                panic!("index out of range");
            }
            Ok(ToolOutput::text("unreachable"))
        })
        .build()
        .unwrap();
    let result = ToolInvoker::default()
        .invoke(Some(&contract), &call("panics", json!({})), ToolContext::detached("c"))
        .await;
    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ToolErrorKind::Execution);
    assert!(failure.message.contains("index out of range"));
}

#[tokio::test]
async fn invoke_times_out() {
    let contract = ToolContract::builder("slow")
        .handler(|_, _| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("late"))
        })
        .timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let result = ToolInvoker::new(Duration::from_secs(60))
        .invoke(Some(&contract), &call("slow", json!({})), ToolContext::detached("c"))
        .await;
    assert_eq!(result.error().unwrap().kind, ToolErrorKind::Timeout);
}

#[tokio::test]
async fn invoke_default_timeout_applies() {
    let contract = ToolContract::builder("slow")
        .handler(|_, _| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("late"))
        })
        .build()
        .unwrap();
    let result = ToolInvoker::new(Duration::from_millis(20))
        .invoke(Some(&contract), &call("slow", json!({})), ToolContext::detached("c"))
        .await;
    assert!(result.error().unwrap().message.contains("20ms"));
}

#[tokio::test]
async fn invoke_observes_cancellation() {
    let contract = ToolContract::builder("waits")
        .handler(|_, _| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("late"))
        })
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let ctx = ToolContext::new("c", "run-test", Arc::new(MemoryState::new()), cancel.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let result = ToolInvoker::default()
        .invoke(Some(&contract), &call("waits", json!({})), ctx)
        .await;
    canceller.await.unwrap();
    assert_eq!(result.error().unwrap().kind, ToolErrorKind::Cancelled);
}

#[tokio::test]
async fn tools_read_and_write_state() {
    let contract = ToolContract::builder("remember")
        .schema(ArgumentSchema::new().required("company", ParamType::String, ""))
        .handler(|args, ctx| async move {
            let company = args.str("company").unwrap_or_default().to_string();
            let previous = ctx.get("last_company").await;
            ctx.set("last_company", json!(company)).await;
            Ok(ToolOutput::Json(json!({"previous": previous})))
        })
        .build()
        .unwrap();

    let state = Arc::new(MemoryState::new());
    let ctx = ToolContext::new("c", "run-test", state.clone(), CancellationToken::new());
    let invoker = ToolInvoker::default();
    invoker
        .invoke(Some(&contract), &call("remember", json!({"company": "Lyft"})), ctx.clone())
        .await;
    let second = invoker
        .invoke(Some(&contract), &call("remember", json!({"company": "Uber"})), ctx)
        .await;

    assert_eq!(
        second.outcome,
        Ok(ToolOutput::Json(json!({"previous": "Lyft"})))
    );
    assert_eq!(state.get("last_company").await, Some(json!("Uber")));
}

// ===========================================================================
// Confirmation handlers
// ===========================================================================

struct Recorder {
    before: AtomicUsize,
    after: AtomicUsize,
}

#[async_trait::async_trait]
impl ConfirmationHandler for Recorder {
    async fn before_call(
        &self,
        _request: &ToolCallRequest,
        _args: &ToolArgs,
        _ctx: &ToolContext,
    ) -> Confirmation {
        self.before.fetch_add(1, Ordering::SeqCst);
        Confirmation::Approve
    }

    async fn after_call(
        &self,
        _request: &ToolCallRequest,
        outcome: Result<ToolOutput, ToolFailure>,
    ) -> Result<ToolOutput, ToolFailure> {
        self.after.fetch_add(1, Ordering::SeqCst);
        outcome.map(|o| ToolOutput::text(format!("[reviewed] {}", o.to_content_string())))
    }
}

#[tokio::test]
async fn confirmation_runs_before_and_after() {
    let recorder = Arc::new(Recorder {
        before: AtomicUsize::new(0),
        after: AtomicUsize::new(0),
    });
    let contract = send_hello().with_confirmation(recorder.clone());
    let result = ToolInvoker::default()
        .invoke(
            Some(&contract),
            &call("send_hello", json!({"destination": "Karen"})),
            ToolContext::detached("c"),
        )
        .await;
    assert_eq!(result.to_content_string(), "[reviewed] sent 'hello' to Karen");
    assert_eq!(recorder.before.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.after.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn confirmation_skipped_for_invalid_arguments() {
    let recorder = Arc::new(Recorder {
        before: AtomicUsize::new(0),
        after: AtomicUsize::new(0),
    });
    let invoker = ToolInvoker::default().with_confirmation(recorder.clone());
    let result = invoker
        .invoke(Some(&send_hello()), &call("send_hello", json!({})), ToolContext::detached("c"))
        .await;
    assert!(result.is_error());
    assert_eq!(recorder.before.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn veto_substitutes_message() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let contract = ToolContract::builder("send_hello")
        .schema(send_hello_schema())
        .sync_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("sent".into())
        })
        .confirm_with(Arc::new(ApproveIf::new(
            |_, args| args.str("destination") != Some("Mallory"),
            "The user declined to send this message.",
        )))
        .build()
        .unwrap();

    let invoker = ToolInvoker::default();
    let vetoed = invoker
        .invoke(
            Some(&contract),
            &call("send_hello", json!({"destination": "Mallory"})),
            ToolContext::detached("c"),
        )
        .await;
    assert!(!vetoed.is_error());
    assert_eq!(vetoed.to_content_string(), "The user declined to send this message.");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let approved = invoker
        .invoke(
            Some(&contract),
            &call("send_hello", json!({"destination": "Karen"})),
            ToolContext::detached("c"),
        )
        .await;
    assert_eq!(approved.to_content_string(), "sent");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct Amender(serde_json::Value);

#[async_trait::async_trait]
impl ConfirmationHandler for Amender {
    async fn before_call(
        &self,
        _request: &ToolCallRequest,
        args: &ToolArgs,
        _ctx: &ToolContext,
    ) -> Confirmation {
        Confirmation::Amend(args.clone().with("message", self.0.clone()))
    }
}

#[tokio::test]
async fn amended_arguments_are_revalidated() {
    let invoker = ToolInvoker::default();
    let req = call("send_hello", json!({"destination": "Karen"}));

    let ok = send_hello().with_confirmation(Arc::new(Amender(json!("hi there"))));
    let result = invoker.invoke(Some(&ok), &req, ToolContext::detached("c")).await;
    assert_eq!(result.to_content_string(), "sent 'hi there' to Karen");

    let bad = send_hello().with_confirmation(Arc::new(Amender(json!(12))));
    let result = invoker.invoke(Some(&bad), &req, ToolContext::detached("c")).await;
    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ToolErrorKind::ArgumentValidation);
    assert!(failure.message.starts_with("amended arguments rejected"));
}

#[tokio::test]
async fn contract_handler_overrides_default() {
    let invoker = ToolInvoker::default().with_confirmation(Arc::new(ApproveIf::new(
        |_, _| false,
        "blocked by default policy",
    )));
    let req = call("send_hello", json!({"destination": "Karen"}));

    let result = invoker.invoke(Some(&send_hello()), &req, ToolContext::detached("c")).await;
    assert_eq!(result.to_content_string(), "blocked by default policy");

    let own = send_hello().with_confirmation(Arc::new(AlwaysApprove));
    let result = invoker.invoke(Some(&own), &req, ToolContext::detached("c")).await;
    assert_eq!(result.to_content_string(), "sent 'hello' to Karen");
}
