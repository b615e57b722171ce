//! Integration tests for the OpenAI-compatible backend against a mock server.

use futures::StreamExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewq_core::{ChecklistPrompt, DocumentPart, Error, QaModel, ReviewModel};
use reviewq_inference::{OpenAIBackend, OpenAIConfig};

fn backend(server: &MockServer) -> OpenAIBackend {
    OpenAIBackend::new(OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        gen_model: "test-gen".to_string(),
        timeout_seconds: 10,
        ..OpenAIConfig::default()
    })
    .expect("Failed to create backend")
}

fn chat_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

fn document() -> DocumentPart {
    DocumentPart {
        document_name: "contract.txt".to_string(),
        text: "Logs are kept for 30 days.".to_string(),
        part_index: 0,
        total_parts: 1,
    }
}

#[tokio::test]
async fn test_review_chunk_sends_auth_and_parses_verdicts() {
    let server = MockServer::start().await;
    let items = vec![
        ChecklistPrompt {
            id: Uuid::new_v4(),
            content: "Retention period stated".to_string(),
        },
        ChecklistPrompt {
            id: Uuid::new_v4(),
            content: "Processor named".to_string(),
        },
    ];

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({"model": "test-gen", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            r#"[{"item": 1, "evaluation": "A", "comment": "30 days"},
                {"item": 2, "evaluation": "C", "comment": "not named"}]"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let verdicts = backend(&server)
        .review_chunk(&items, &document())
        .await
        .expect("review should succeed");

    assert_eq!(verdicts.len(), 2);
    assert_eq!(verdicts[0].checklist_item_id, items[0].id);
    assert_eq!(verdicts[1].evaluation, "C");
}

#[tokio::test]
async fn test_context_length_error_becomes_overflow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "message": "This model's maximum context length is 8192 tokens",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .review_chunk(
            &[ChecklistPrompt {
                id: Uuid::new_v4(),
                content: "Anything".to_string(),
            }],
            &document(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContextOverflow(_)), "got {err:?}");
}

#[tokio::test]
async fn test_rate_limit_is_inference_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate_checklist(&[document()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(ref m) if m.contains("Rate limit")));
}

#[tokio::test]
async fn test_generate_checklist_parses_array() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            "```json\n[\"Retention period stated\", \"Processor named\"]\n```",
        )))
        .mount(&server)
        .await;

    let items = backend(&server)
        .generate_checklist(&[document()], Some("GDPR"))
        .await
        .unwrap();
    assert_eq!(items, vec!["Retention period stated", "Processor named"]);
}

#[tokio::test]
async fn test_answer_streams_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Yes, \"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"c\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"30 days.\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let stream = backend(&server)
        .answer("How long are logs kept?", "[Retention] 30 days")
        .await
        .unwrap();
    let answer: String = stream
        .map(|delta| delta.unwrap())
        .collect::<Vec<_>>()
        .await
        .concat();
    assert_eq!(answer, "Yes, 30 days.");
}
