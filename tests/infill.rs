//! Native `/infill` path of the completion adapter against a mock llama.cpp server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use infill::adapter::CompletionAdapter;
use infill::config::Config;
use infill::dispatch::{Backend, ContextChunk};
use infill::error::InfillError;

use common::{closed_port, json_response, mock_listener, serve_once};

fn native_config(port: u16) -> Arc<Config> {
    Arc::new(Config {
        endpoint: format!("http://127.0.0.1:{port}"),
        n_predict: 64,
        t_max_prompt_ms: 300,
        t_max_predict_ms: 900,
        ..Default::default()
    })
}

const COMPLETION_BODY: &str = r#"{
    "content": "return a + b",
    "tokens_cached": 42,
    "truncated": false,
    "generation_settings": {"n_ctx": 8192},
    "timings": {"prompt_n": 10, "prompt_ms": 12.5, "predicted_n": 4, "predicted_ms": 30.1},
    "stop": true
}"#;

#[tokio::test]
async fn indent_hint_and_empty_context_reach_the_infill_route() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", COMPLETION_BODY));

    let adapter = CompletionAdapter::new(native_config(port)).unwrap();
    assert_eq!(adapter.backend(), Backend::NativeInfill);

    let result = adapter
        .get_completion("def add(a, b):\n    ", "\n", "", &[], Some(4))
        .await
        .unwrap()
        .expect("200 should yield a completion");

    assert_eq!(result.content.as_deref(), Some("return a + b"));
    assert_eq!(result.tokens_cached, Some(42));
    assert_eq!(result.truncated, Some(false));
    assert_eq!(result.timings.unwrap().predicted_n, Some(4.0));

    let request = server.await.unwrap();
    assert_eq!(request.method(), "POST");
    assert_eq!(request.path(), "/infill");

    let body = request.json();
    assert_eq!(body["n_indent"], 4);
    assert_eq!(body["input_extra"], serde_json::json!([]));
    assert_eq!(body["input_prefix"], "def add(a, b):\n    ");
    assert_eq!(body["input_suffix"], "\n");
    assert_eq!(body["prompt"], "");
    assert_eq!(body["n_predict"], 64);
    assert_eq!(body["t_max_prompt_ms"], 300);
    assert_eq!(body["t_max_predict_ms"], 900);
    assert_eq!(body["cache_prompt"], true);
    assert_eq!(body["samplers"], serde_json::json!(["top_k", "top_p", "infill"]));
}

#[tokio::test]
async fn prefix_and_suffix_are_sent_untruncated() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", "{}"));

    let config = Arc::new(Config {
        endpoint: format!("http://127.0.0.1:{port}"),
        n_prefix: 4,
        n_suffix: 4,
        ..Default::default()
    });
    let adapter = CompletionAdapter::new(config).unwrap();
    let prefix = "a".repeat(100);
    let suffix = "b".repeat(100);

    let result = adapter
        .get_completion(&prefix, &suffix, "", &[], None)
        .await
        .unwrap();
    // All fields are optional: an empty object is a valid, empty result.
    assert_eq!(result, Some(Default::default()));

    let body = server.await.unwrap().json();
    assert_eq!(body["input_prefix"].as_str().unwrap().len(), 100);
    assert_eq!(body["input_suffix"].as_str().unwrap().len(), 100);
    assert!(body.get("n_indent").is_none());
}

#[tokio::test]
async fn non_200_statuses_yield_no_completion() {
    for (status, body) in [
        ("400 Bad Request", r#"{"error":"bad"}"#),
        ("404 Not Found", "not found"),
        ("500 Internal Server Error", COMPLETION_BODY),
        ("503 Service Unavailable", ""),
        ("204 No Content", ""),
    ] {
        let (listener, port) = mock_listener().await;
        let server = serve_once(listener, json_response(status, body));
        let adapter = CompletionAdapter::new(native_config(port)).unwrap();

        let result = adapter
            .get_completion("fn main() {", "}", "", &[], None)
            .await;

        assert!(
            matches!(result, Ok(None)),
            "status {status} should yield no completion, got {result:?}"
        );
        server.await.unwrap();
    }
}

#[tokio::test]
async fn malformed_success_body_yields_no_completion() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", "<html>proxy page</html>"));
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let result = adapter.get_completion("x", "y", "", &[], None).await.unwrap();
    assert!(result.is_none());
    server.await.unwrap();
}

#[tokio::test]
async fn oversized_success_body_yields_no_completion() {
    let (listener, port) = mock_listener().await;
    let body = format!(r#"{{"content":"{}"}}"#, "a".repeat(2 * 1024 * 1024 + 16));
    let server = serve_once(listener, json_response("200 OK", &body));
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let result = adapter.get_completion("x", "y", "", &[], None).await.unwrap();
    assert!(result.is_none(), "bodies over 2MB are discarded");
    server.await.unwrap();
}

#[tokio::test]
async fn transport_failure_propagates() {
    let port = closed_port().await;
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let err = adapter
        .get_completion("x", "y", "", &[], None)
        .await
        .unwrap_err();
    assert!(err.is_transport(), "expected transport error, got {err:?}");
}

#[tokio::test]
async fn api_key_is_sent_as_bearer_token() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", "{}"));
    let config = Arc::new(Config {
        endpoint: format!("http://127.0.0.1:{port}"),
        api_key: Some("sekrit".to_string()),
        ..Default::default()
    });
    let adapter = CompletionAdapter::new(config).unwrap();

    adapter.get_completion("x", "y", "", &[], None).await.unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.header("authorization"), Some("Bearer sekrit"));
}

#[tokio::test]
async fn prime_cache_sends_preparation_payload() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", r#"{"content":""}"#));
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let chunks = vec![
        ContextChunk::from("use std::io;"),
        ContextChunk::from(serde_json::json!({
            "text": "fn helper() {}",
            "filename": "src/util.rs",
            "time": 1_700_000_000
        })),
    ];
    let task = adapter.prime_cache(&chunks).expect("native backend primes");
    task.await.unwrap().unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.path(), "/infill");
    let body = request.json();
    assert_eq!(body["n_predict"], 0);
    assert_eq!(body["samplers"], serde_json::json!([]));
    assert_eq!(body["t_max_predict_ms"], 1);
    assert_eq!(body["t_max_prompt_ms"], 300);
    assert_eq!(body["cache_prompt"], true);
    assert_eq!(body["input_prefix"], "");
    assert_eq!(body["input_suffix"], "");
    assert_eq!(body["prompt"], "");
    assert_eq!(body["input_extra"][0], "use std::io;");
    assert_eq!(body["input_extra"][1]["filename"], "src/util.rs");
}

#[tokio::test]
async fn chunks_are_forwarded_verbatim() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("200 OK", "{}"));
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let raw = serde_json::json!([
        {"filename": "src/a.rs", "score": 0.5, "text": "fn a() {}", "time": 1.5},
        {"chunk": "no text field", "tags": ["x", {"nested": null}]},
        "plain"
    ]);
    let chunks: Vec<ContextChunk> = serde_json::from_value(raw.clone()).unwrap();

    adapter.prime_cache(&chunks).unwrap().await.unwrap().unwrap();

    let request = server.await.unwrap();
    let body = String::from_utf8(request.body.clone()).unwrap();
    let expected = serde_json::to_string(&raw).unwrap();
    assert!(
        body.contains(&format!("\"input_extra\":{expected}")),
        "input_extra altered in transit: {body}"
    );
    assert_eq!(request.json()["input_extra"], raw);
}

#[tokio::test]
async fn prime_cache_ignores_rejections() {
    let (listener, port) = mock_listener().await;
    let server = serve_once(listener, json_response("500 Internal Server Error", "boom"));
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let task = adapter.prime_cache(&[]).unwrap();
    assert!(task.await.unwrap().is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn prime_cache_reports_transport_failure_to_whoever_awaits() {
    let port = closed_port().await;
    let adapter = CompletionAdapter::new(native_config(port)).unwrap();

    let result = adapter.prime_cache(&[]).unwrap().await.unwrap();
    assert!(matches!(result, Err(InfillError::Request(_))));
}

#[tokio::test]
async fn openai_mode_never_contacts_infill() {
    let (infill_listener, infill_port) = mock_listener().await;
    let config = Arc::new(Config {
        endpoint: format!("http://127.0.0.1:{infill_port}"),
        use_openai_endpoint: true,
        ..Default::default()
    });
    let adapter = CompletionAdapter::new(config).unwrap();
    assert_eq!(adapter.backend(), Backend::OpenAiCompatible);
    assert!(!adapter.has_remote_client());

    let completion = adapter
        .get_completion("x", "y", "", &["ctx".into()], Some(2))
        .await
        .unwrap();
    assert!(completion.is_none(), "no client configured: silently nothing");
    assert!(adapter.prime_cache(&["ctx".into()]).is_none());

    let accepted =
        tokio::time::timeout(Duration::from_millis(300), infill_listener.accept()).await;
    assert!(accepted.is_err(), "/infill must not be contacted in OpenAI mode");
}
