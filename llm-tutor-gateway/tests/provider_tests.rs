use llm_tutor_core::{
    ErrorClassifier, ErrorContext, ErrorKind, GenerationProvider, GenerationRequest,
    ProviderError, RequestContext,
};
use llm_tutor_gateway::config::ProviderSettings;
use llm_tutor_gateway::HttpProvider;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> ProviderSettings {
    ProviderSettings {
        endpoint: server.uri(),
        model: "tutor-test".to_string(),
        api_key: Some("test-key".to_string()),
        request_timeout_ms: 500,
        max_tokens: Some(256),
        temperature: Some(0.2),
    }
}

fn request() -> GenerationRequest {
    GenerationRequest::new(
        "What is atrial fibrillation?",
        RequestContext::new().with_level("beginner"),
    )
    .with_system_prompt("You are a tutor.")
}

fn completion(content: &str, finish_reason: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "tutor-test-0613",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": finish_reason
        }],
        "usage": {"prompt_tokens": 21, "completion_tokens": 34, "total_tokens": 55}
    })
}

#[tokio::test]
async fn test_successful_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "tutor-test",
            "max_tokens": 256,
            "messages": [
                {"role": "system", "content": "You are a tutor."},
                {"role": "user", "content": "What is atrial fibrillation?"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("An irregular, often rapid heart rhythm.", "stop")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let response = provider.generate(&request()).await.unwrap();

    assert_eq!(response.content, "An irregular, often rapid heart rhythm.");
    assert_eq!(response.model, "tutor-test-0613");
    assert_eq!(response.usage.total_tokens, 55);
}

#[rstest]
#[case(429, r#"{"error": {"message": "Rate limit reached"}}"#, ErrorKind::Quota)]
#[case(503, "", ErrorKind::Network)]
#[case(400, r#"{"error": {"message": "maximum context length exceeded"}}"#, ErrorKind::ContextTooLong)]
#[case(401, r#"{"error": {"message": "Incorrect API key provided"}}"#, ErrorKind::Unknown)]
#[tokio::test]
async fn test_error_status_maps_to_kind(
    #[case] status: u16,
    #[case] body: &str,
    #[case] expected: ErrorKind,
) {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Status { status: s, .. } if s == status));

    let classified =
        ErrorClassifier::new().classify(err.into(), &ErrorContext::new("generate", "tutor-1"));
    assert_eq!(classified.kind(), expected);
}

#[tokio::test]
async fn test_error_body_message_extracted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
        )
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert_eq!(
        err,
        ProviderError::Status {
            status: 429,
            message: "Rate limit reached".to_string()
        }
    );
}

#[tokio::test]
async fn test_content_filter_finish_reason() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("", "content_filter")))
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert!(matches!(err, ProviderError::ContentFiltered(_)));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_empty_choices_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert_eq!(
        err,
        ProviderError::InvalidResponse("response has no choices".to_string())
    );
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late", "stop"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let provider = HttpProvider::new(settings(&server)).unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert_eq!(err, ProviderError::Timeout(Duration::from_millis(500)));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let provider = HttpProvider::new(ProviderSettings {
        endpoint: "http://127.0.0.1:9".to_string(),
        request_timeout_ms: 2_000,
        ..ProviderSettings::default()
    })
    .unwrap();
    let err = provider.generate(&request()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)));
}
