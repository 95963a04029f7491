//! Provider adapters against mocked HTTP endpoints

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use likert_eval::providers::{AnthropicClient, GeminiClient, LLMProvider, OpenAIClient, ProviderError, SharedProvider};
use likert_eval::runner::{DispatchConfig, Dispatcher, RateLimiter};
use likert_eval::survey::{Question, ResponseParser};

fn chat_reply(content: &str, finish_reason: &str) -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 42, "completion_tokens": 1}
    })
}

#[tokio::test]
async fn test_openai_send_trims_and_sends_system_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 20,
            "messages": [
                {"role": "system", "content": "Rate 1-5"},
                {"role": "user", "content": "Keeping extra change."}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  4\n", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new("sk-test".into())
        .with_base_url(server.uri())
        .with_model("gpt-4o");

    let text = client.send("Rate 1-5", "Keeping extra change.", 20).await.unwrap();
    assert_eq!(text, "4");
}

#[tokio::test]
async fn test_openai_rate_limit_and_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "limited"})))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_json(json!({"error": {"message": "Rate limit reached for requests", "type": "requests"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "broke"})))
        .respond_with(ResponseTemplate::new(429).set_body_json(
            json!({"error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}}),
        ))
        .mount(&server)
        .await;

    let limited = OpenAIClient::new("k".into()).with_base_url(server.uri()).with_model("limited");
    let err = limited.send("s", "u", 5).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { retry_after_ms: 3000 }));
    assert!(err.is_retryable());

    let broke = OpenAIClient::new("k".into()).with_base_url(server.uri()).with_model("broke");
    let err = broke.send("s", "u", 5).await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_openai_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
        .mount(&server)
        .await;

    let client = OpenAIClient::compatible("together", "bad".into(), server.uri());
    let err = client.send("s", "u", 5).await.unwrap_err();

    match err {
        ProviderError::Auth(message) => {
            assert!(message.contains("together"));
            assert!(message.contains("Incorrect API key"));
        }
        other => panic!("expected auth error, got {other}"),
    }
}

#[tokio::test]
async fn test_openai_length_cut_without_text_is_token_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("", "length")))
        .mount(&server)
        .await;

    let client = OpenAIClient::new("k".into()).with_base_url(server.uri());
    let err = client.send("s", "u", 1).await.unwrap_err();
    assert!(matches!(err, ProviderError::TokenLimit { .. }));
}

#[tokio::test]
async fn test_anthropic_system_field_and_overload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "ak"))
        .and(body_partial_json(json!({
            "system": "Rate 1-5",
            "messages": [{"role": "user", "content": "Recycling cans."}],
            "max_tokens": 30
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "2\n"}],
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 20, "output_tokens": 1}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(529))
        .mount(&server)
        .await;

    let client = AnthropicClient::new("ak".into()).with_base_url(server.uri());

    assert_eq!(client.send("Rate 1-5", "Recycling cans.", 30).await.unwrap(), "2");

    let err = client.send("Rate 1-5", "Recycling cans.", 30).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}

#[tokio::test]
async fn test_gemini_concatenates_system_into_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .and(header("x-goog-api-key", "gk"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "Rate 1-5\n\nDownloading music."}]}],
            "generationConfig": {"maxOutputTokens": 15}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": " 3 "}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 1}
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::new("gk".into()).with_base_url(server.uri());
    assert_eq!(client.send("Rate 1-5", "Downloading music.", 15).await.unwrap(), "3");
}

#[tokio::test]
async fn test_gemini_error_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/bad-key:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/busy:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
        })))
        .mount(&server)
        .await;

    let bad_key = GeminiClient::new("x".into()).with_base_url(server.uri()).with_model("bad-key");
    assert!(matches!(bad_key.send("s", "u", 5).await.unwrap_err(), ProviderError::Auth(_)));

    let busy = GeminiClient::new("x".into()).with_base_url(server.uri()).with_model("busy");
    let err = busy.send("s", "u", 5).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}

#[tokio::test]
async fn test_pacing_wait_does_not_count_against_call_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("3", "stop")))
        .expect(3)
        .mount(&server)
        .await;

    // one request per 400ms window, against a 150ms call timeout
    let client = OpenAIClient::new("k".into())
        .with_base_url(server.uri())
        .with_rate_limiter(Arc::new(RateLimiter::with_window(1, 0, Duration::from_millis(400))));
    let provider: SharedProvider = Arc::new(client);

    let config = DispatchConfig {
        parallel_requests: 3,
        max_retries: 1,
        base_delay_ms: 1,
        timeout_ms: 150,
        parse_retries: 0,
        max_output_tokens: 5,
        jitter_seed: Some(3),
    };
    let dispatcher = Dispatcher::new(config, ResponseParser::default());

    let started = Instant::now();
    let run = dispatcher
        .run(&[Question::new(1, "Keeping extra change.")], 3, provider)
        .await
        .unwrap();

    assert_eq!(run.attempts, 1);
    assert!(run.backoff_delays.is_empty());
    assert_eq!(run.records.len(), 3);
    assert!(run.records.iter().all(|r| r.response == 3));
    assert!(started.elapsed() >= Duration::from_millis(800));
}
